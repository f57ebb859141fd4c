/// The sender, recipients and body of a single inbound SMTP transaction.
///
/// Addresses are kept exactly as the peer sent them inside the angle
/// brackets; the relay compares them against alias sources verbatim.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    sender: String,
    recipients: Vec<String>,
    data: Vec<u8>,
}

impl Envelope {
    pub fn new(sender: impl Into<String>, recipients: Vec<String>, data: Vec<u8>) -> Self {
        Self {
            sender: sender.into(),
            recipients,
            data,
        }
    }

    /// Returns the reverse path for this message, empty for the null sender
    #[inline]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    #[inline]
    pub fn set_sender(&mut self, sender: impl Into<String>) {
        self.sender = sender.into();
    }

    /// Returns the recipients in the order they were given
    #[inline]
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    #[inline]
    pub fn add_recipient(&mut self, recipient: impl Into<String>) {
        self.recipients.push(recipient.into());
    }

    /// Returns the raw message octets
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    /// Clears the transaction, as RSET or a completed DATA does
    pub fn reset(&mut self) {
        self.sender.clear();
        self.recipients.clear();
        self.data.clear();
    }
}
