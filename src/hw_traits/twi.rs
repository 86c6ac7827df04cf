//! Register interface of the two-wire serial peripheral.
//!
//! The driver in [`crate::twi`] is generic over [`TwiPeriph`], so the
//! same state machine runs against the memory-mapped block of an ATmega
//! chip or against a simulated register file on the host.

use bitflags::bitflags;

#[cfg(feature = "atmega328p")]
use avr_device::atmega328p as pac;
#[cfg(feature = "atmega2560")]
use avr_device::atmega2560 as pac;

/// The status code occupies the five high bits of the status register; the
/// low bits hold the prescaler field.
pub const STATUS_MASK: u8 = 0xf8;

bitflags! {
    /// Image of the TWI control register (TWCR).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ControlBits: u8 {
        /// Interrupt flag. Written as 1 to release the bus for the next event.
        const TWINT = 1 << 7;
        /// Automatic acknowledge of addressed frames.
        const TWEA = 1 << 6;
        /// Transmit a start condition once the bus is free.
        const TWSTA = 1 << 5;
        /// Transmit a stop condition.
        const TWSTO = 1 << 4;
        /// Write collision flag.
        const TWWC = 1 << 3;
        /// Peripheral enable.
        const TWEN = 1 << 2;
        /// Interrupt enable.
        const TWIE = 1 << 0;

        /// Baseline ready/listening state: enabled, interrupt driven,
        /// acknowledging addressed frames.
        const READY = Self::TWEN.bits() | Self::TWIE.bits() | Self::TWEA.bits();
    }
}

/// Division factor applied by the bit-rate generator prescaler (TWPS1:0).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Prescaler {
    /// Prescale by 1
    Div1 = 0,
    /// Prescale by 4
    Div4 = 1,
    /// Prescale by 16
    Div16 = 2,
    /// Prescale by 64
    Div64 = 3,
}

impl Prescaler {
    /// Division factor selected by this prescaler setting.
    pub const fn factor(self) -> u32 {
        match self {
            Prescaler::Div1 => 1,
            Prescaler::Div4 => 4,
            Prescaler::Div16 => 16,
            Prescaler::Div64 => 64,
        }
    }
}

/// Register access for a TWI peripheral.
///
/// Implemented for the PAC `TWI` block when a device feature is enabled.
/// The driver owns exclusive write access to these registers once
/// configured, so implementations need no internal synchronization.
pub trait TwiPeriph {
    /// Read the raw status register. Consumers mask with [`STATUS_MASK`].
    fn status_rd(&self) -> u8;

    /// Read the data register.
    fn data_rd(&self) -> u8;

    /// Write the data register.
    fn data_wr(&self, val: u8);

    /// Program the bit-rate generator.
    fn bit_rate_wr(&self, divider: u8, prescaler: Prescaler);

    /// Program the own (slave) address and general-call recognition bit.
    fn own_address_wr(&self, addr: u8, general_call: bool);

    /// Program the slave address mask. A zero mask matches the own address
    /// exactly.
    fn address_mask_wr(&self, mask: u8);

    /// Write the control register.
    fn ctl_wr(&self, ctl: ControlBits);
}

#[cfg(feature = "device")]
macro_rules! twi_impl {
    ($TWI:ty) => {
        impl TwiPeriph for $TWI {
            #[inline(always)]
            fn status_rd(&self) -> u8 {
                self.twsr().read().bits()
            }

            #[inline(always)]
            fn data_rd(&self) -> u8 {
                self.twdr().read().bits()
            }

            #[inline(always)]
            fn data_wr(&self, val: u8) {
                self.twdr().write(|w| unsafe { w.bits(val) });
            }

            #[inline(always)]
            fn bit_rate_wr(&self, divider: u8, prescaler: Prescaler) {
                self.twsr().write(|w| unsafe { w.bits(prescaler as u8) });
                self.twbr().write(|w| unsafe { w.bits(divider) });
            }

            #[inline(always)]
            fn own_address_wr(&self, addr: u8, general_call: bool) {
                self.twar()
                    .write(|w| unsafe { w.bits((addr << 1) | general_call as u8) });
            }

            #[inline(always)]
            fn address_mask_wr(&self, mask: u8) {
                self.twamr().write(|w| unsafe { w.bits(mask << 1) });
            }

            #[inline(always)]
            fn ctl_wr(&self, ctl: ControlBits) {
                self.twcr().write(|w| unsafe { w.bits(ctl.bits()) });
            }
        }
    };
}

#[cfg(feature = "device")]
twi_impl!(pac::TWI);
