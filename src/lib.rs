//! Interrupt-driven driver for the AVR two-wire serial interface (TWI),
//! the I2C-compatible peripheral of the ATmega328P and ATmega2560. Here
//! are the [`ATmega328P datasheet`] and [`ATmega2560 datasheet`] for
//! reference; status codes and register names follow their "2-wire Serial
//! Interface" sections.
//!
//! The peripheral runs as master transmitter and slave receiver at the
//! same time: outbound packets are queued with
//! [`twi::Twi::start_send`] and completed inbound packets drained with
//! [`twi::Twi::poll_receive`], while [`twi::Twi::handle_interrupt`]
//! sequences the bus protocol from the TWI interrupt vector.
//!
//! [`ATmega328P datasheet`]: https://ww1.microchip.com/downloads/en/DeviceDoc/ATmega48A-PA-88A-PA-168A-PA-328-P-DS-DS40002061A.pdf
//! [`ATmega2560 datasheet`]: https://ww1.microchip.com/downloads/en/devicedoc/atmel-2549-8-bit-avr-microcontroller-atmega640-1280-1281-2560-2561_datasheet.pdf
//!
//! # Usage
//!
//! Enable exactly one device feature (`atmega328p` or `atmega2560`). The
//! driver instance is shared between the interrupt handler and main-loop
//! code through a critical-section mutex; `start_send` and `poll_receive`
//! must not race the TWI interrupt.
//!
//! ```ignore
//! use core::cell::RefCell;
//!
//! use atmega_twi::{pac, twi::{Twi, TwiConfig}};
//! use critical_section::Mutex;
//!
//! static DRIVER: Mutex<RefCell<Option<Twi<pac::TWI>>>> = Mutex::new(RefCell::new(None));
//!
//! fn init(dp: pac::Peripherals) {
//!     let twi = TwiConfig::new(dp.TWI, 0x65)
//!         .bus_speed(16_000_000, 100_000)
//!         .configure();
//!     critical_section::with(|cs| DRIVER.borrow(cs).replace(Some(twi)));
//!     unsafe { avr_device::interrupt::enable() };
//! }
//!
//! #[avr_device::interrupt(atmega328p)]
//! fn TWI() {
//!     critical_section::with(|cs| {
//!         if let Some(twi) = DRIVER.borrow_ref_mut(cs).as_mut() {
//!             twi.handle_interrupt();
//!         }
//!     });
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

pub mod hw_traits;
pub mod twi;

#[cfg(feature = "atmega328p")]
pub use avr_device::atmega328p as pac;
#[cfg(feature = "atmega2560")]
pub use avr_device::atmega2560 as pac;
