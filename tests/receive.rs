//! Slave-receiver scenarios against the simulated register file.

mod common;

use atmega_twi::twi::{RxFlags, Status, TwiConfig, MAX_PAYLOAD};
use common::*;

#[test]
fn receive_four_bytes_at_0x65() {
    let (mut twi, sim) = new_driver(0x65);

    event(&mut twi, &sim, Status::OwnAddressReceived);
    assert!(twi.is_receiving());
    assert_eq!(sim.last_ctl(), ctl_continue());

    for byte in [0x49, 0x32, 0x43, 0x05] {
        data_event(&mut twi, &sim, Status::DataReceivedAcked, byte);
    }
    // Nothing to poll until the stop condition lands.
    assert!(twi.poll_receive().is_err());

    event(&mut twi, &sim, Status::StopReceived);
    assert!(!twi.is_receiving());

    let packet = twi.poll_receive().expect("completed packet");
    assert_eq!(packet.len(), 4);
    assert_eq!(packet.payload(), &[0x49, 0x32, 0x43, 0x05]);
    assert!(!packet.is_from_general_call());
    assert!(!packet.is_overflowed());
    assert!(!packet.previous_lost());
    assert_eq!(packet.flags(), RxFlags::COMPLETE);

    // Exactly once per completed packet.
    assert!(twi.poll_receive().is_err());
}

#[test]
fn receive_overflow_saturates_at_capacity() {
    let (mut twi, sim) = new_driver(0x65);

    event(&mut twi, &sim, Status::OwnAddressReceived);
    for byte in 0..12u8 {
        data_event(&mut twi, &sim, Status::DataReceivedAcked, byte);
    }
    event(&mut twi, &sim, Status::StopReceived);

    let packet = twi.poll_receive().expect("completed packet");
    assert_eq!(packet.len(), MAX_PAYLOAD);
    assert!(packet.is_overflowed());
    assert_eq!(packet.payload(), &[0, 1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn unread_packet_is_discarded_for_the_next_one() {
    let (mut twi, sim) = new_driver(0x65);

    event(&mut twi, &sim, Status::OwnAddressReceived);
    data_event(&mut twi, &sim, Status::DataReceivedAcked, 0x11);
    event(&mut twi, &sim, Status::StopReceived);
    // First packet completed but never polled.

    event(&mut twi, &sim, Status::OwnAddressReceived);
    data_event(&mut twi, &sim, Status::DataReceivedAcked, 0x99);
    event(&mut twi, &sim, Status::StopReceived);

    let packet = twi.poll_receive().expect("completed packet");
    assert_eq!(packet.payload(), &[0x99]);
    assert!(packet.previous_lost());
}

#[test]
fn general_call_packet_is_flagged() {
    let sim = SimTwi::new();
    let mut twi = TwiConfig::new(sim.clone(), 0x65)
        .accept_general_call()
        .configure();
    // Recognition bit reaches the address register.
    assert_eq!(sim.with(|r| r.own_address), Some((0x65, true)));

    event(&mut twi, &sim, Status::GeneralCallReceived);
    data_event(&mut twi, &sim, Status::GeneralCallDataAcked, 0x42);
    event(&mut twi, &sim, Status::StopReceived);

    let packet = twi.poll_receive().expect("completed packet");
    assert!(packet.is_from_general_call());
    assert_eq!(packet.payload(), &[0x42]);
}

#[test]
fn nacked_data_byte_is_still_stored() {
    // The NACK variants arrive when the buffer-full boundary races the
    // acknowledge; the byte itself is valid.
    let (mut twi, sim) = new_driver(0x65);

    event(&mut twi, &sim, Status::OwnAddressReceived);
    data_event(&mut twi, &sim, Status::DataReceivedNacked, 0x7e);
    event(&mut twi, &sim, Status::StopReceived);

    let packet = twi.poll_receive().expect("completed packet");
    assert_eq!(packet.payload(), &[0x7e]);
}

#[test]
fn data_without_address_match_is_accepted() {
    let (mut twi, sim) = new_driver(0x65);

    data_event(&mut twi, &sim, Status::DataReceivedAcked, 0x55);
    assert!(twi.is_receiving());
    event(&mut twi, &sim, Status::StopReceived);

    let packet = twi.poll_receive().expect("completed packet");
    assert_eq!(packet.payload(), &[0x55]);
}

#[test]
fn stop_while_idle_keeps_listening() {
    let (mut twi, sim) = new_driver(0x65);

    event(&mut twi, &sim, Status::StopReceived);
    assert_eq!(sim.last_ctl(), ctl_continue());
    assert!(twi.poll_receive().is_err());
}

#[test]
fn arbitration_loss_variants_enter_receive() {
    for status in [
        Status::ArbitrationLostOwnAddress,
        Status::ArbitrationLostGeneralCall,
    ] {
        let (mut twi, sim) = new_driver(0x65);
        event(&mut twi, &sim, status);
        assert!(twi.is_receiving());
        assert_eq!(sim.last_ctl(), ctl_continue());
    }
}

#[test]
fn queued_send_starts_at_the_receive_stop() {
    let (mut twi, sim) = new_driver(0x65);

    event(&mut twi, &sim, Status::OwnAddressReceived);
    let ctl_writes_before = sim.ctl_write_count();

    // Accepted, but the start condition is deferred.
    assert_eq!(twi.start_send(0x2b, &[0xde, 0xad]), Ok(()));
    assert!(twi.is_sending());
    assert_eq!(sim.ctl_write_count(), ctl_writes_before);

    data_event(&mut twi, &sim, Status::DataReceivedAcked, 0x01);
    event(&mut twi, &sim, Status::StopReceived);
    assert_eq!(sim.last_ctl(), ctl_start());

    // The receive is intact and the send proceeds normally.
    let packet = twi.poll_receive().expect("completed packet");
    assert_eq!(packet.payload(), &[0x01]);

    event(&mut twi, &sim, Status::StartSent);
    event(&mut twi, &sim, Status::AddressAcked);
    event(&mut twi, &sim, Status::DataSentAcked);
    event(&mut twi, &sim, Status::DataSentAcked);
    assert!(twi.send_complete());
    assert_eq!(sim.data_writes(), vec![0x56, 0xde, 0xad]);
}
