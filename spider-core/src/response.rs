//! The `Response` type: an agent's report on one dispatched request.

/// Status code that marks a response as successful.
pub const SUCCESS_STATUS: u16 = 200;

/// An agent's outcome for a previously dispatched request.
#[derive(Debug, Clone)]
pub struct Response {
    /// Hash of the request this response correlates with.
    pub request_hash: String,
    /// HTTP-style status code; success iff `== 200`.
    pub status_code: u16,
    /// Identifier of the agent that produced this response.
    pub agent: String,
    /// Wall-clock time the download took, in milliseconds.
    pub elapsed_milliseconds: u64,
    /// Opaque response body bytes, handed to the data-flow pipeline on
    /// success.
    pub content: Vec<u8>,
}

impl Response {
    /// Returns `true` iff `status_code == `[`SUCCESS_STATUS`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code == SUCCESS_STATUS
    }
}
