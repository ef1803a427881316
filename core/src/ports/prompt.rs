//! Interactive port prompt port (interface).

use crate::domain::PortNumber;

/// Source of port text when no argument was given.
///
/// Rendering the prompt belongs to the command line layer; the core only
/// consumes the text it returns.
pub trait PortPrompt: Send + Sync {
    /// Ask for a new port.
    ///
    /// An empty answer accepts `suggested`. `None` means the user gave up and
    /// nothing must change.
    fn ask_port(
        &self,
        current: PortNumber,
        suggested: PortNumber,
    ) -> impl std::future::Future<Output = std::io::Result<Option<String>>> + Send;
}
