use crate::Result;

/// The link below PPP: a modem, serial line or PPPoE session.
///
/// Devices report carrier changes by calling [`Interface::lower_up`],
/// [`Interface::lower_down`] or [`Interface::lower_up_failed`] from outside
/// of these methods.
///
/// [`Interface::lower_up`]: crate::Interface::lower_up
/// [`Interface::lower_down`]: crate::Interface::lower_down
/// [`Interface::lower_up_failed`]: crate::Interface::lower_up_failed
pub trait Device: Send {
    fn name(&self) -> &str;

    /// Starts establishing the carrier.
    ///
    /// Returns `false` if the device cannot even try.
    fn up(&mut self) -> bool;

    /// Starts dropping the carrier.
    fn down(&mut self);

    fn is_up(&self) -> bool;

    /// Transmits one PPP packet. Must not block.
    fn send(&mut self, protocol: u16, packet: &[u8]) -> Result<()>;
}
