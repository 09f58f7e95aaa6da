use crate::protocol::sdp::StreamDescription;

/// A source stream offered to clients, returned by the DESCRIBE handler.
///
/// Wraps the application's [`StreamDescription`]. The server marshals a
/// server-side view of it (controls normalized to `trackID=<i>`, multicast
/// connection address when the `vlcmulticast` query asks for it) into the
/// DESCRIBE response body.
#[derive(Debug)]
pub struct ServerStream {
    description: StreamDescription,
}

impl ServerStream {
    pub fn new(description: StreamDescription) -> Self {
        ServerStream { description }
    }

    pub fn description(&self) -> &StreamDescription {
        &self.description
    }
}
