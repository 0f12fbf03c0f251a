//! Integration tests for the request dispatcher
//!
//! Each test builds a dispatcher over the simulated board and a loopback
//! cable, feeds it requests directly and reads the frames it sends.
//!
//! Covers:
//! - Response header rules and channel selection
//! - Per-peripheral request handling
//! - Stopped-task silence and software reset

use common::loopback::{LoopbackHost, loopback};
use common::test_utils::{DEFAULT_TEST_TIMEOUT, QUIET_TIMEOUT, command_packet};
use common::{TransportError, UsbTransport};
use firmware::sim::SimBoard;
use firmware::tasks::{AnalogTask, GpioTask, I2cTask, SerialTask, SpiTask};
use firmware::{Dispatcher, RxQueue, Task};
use protocol::{GpioEvents, Interface, MAX_PACKET_SIZE, Packet, PacketType, Status};
use std::sync::Arc;
use std::time::Duration;

struct Rig {
    host: LoopbackHost,
    board: SimBoard,
    dispatcher: Dispatcher,
}

fn rig() -> Rig {
    let (host, device) = loopback();
    let board = SimBoard::new();
    let p = board.peripherals();
    let tasks: Vec<Box<dyn Task>> = vec![
        Box::new(GpioTask::new(p.gpio, 8)),
        Box::new(SpiTask::new(p.spi)),
        Box::new(AnalogTask::new(p.analog)),
        Box::new(I2cTask::new(p.i2c, 1_000_000)),
        Box::new(SerialTask::new(p.uart, 32)),
    ];
    let mut dispatcher = Dispatcher::new(
        tasks,
        Arc::new(device),
        p.board,
        Arc::new(RxQueue::new(6)),
    );
    dispatcher.init();
    Rig {
        host,
        board,
        dispatcher,
    }
}

impl Rig {
    /// Process a request and return the frame sent on the Data interface
    fn request(&mut self, ty: PacketType, seq: u8, payload: &[u8]) -> Packet {
        let mut pkt = command_packet(ty, payload);
        pkt.set_sequence(seq);
        self.dispatcher.process(&pkt);
        self.read(Interface::Data, DEFAULT_TEST_TIMEOUT)
            .expect("no response on Data interface")
    }

    /// Run an event poll and return the frame sent on the Event interface, if any
    fn poll_event(&mut self, ty: PacketType) -> Option<Packet> {
        self.dispatcher.process(&Packet::command(ty));
        self.read(Interface::Event, QUIET_TIMEOUT)
    }

    /// Enable every GPIO interrupt on `pin`
    fn enable_irq(&mut self, pin: u8) {
        let mut payload = vec![pin, 1];
        payload.extend_from_slice(&GpioEvents::ALL.bits().to_be_bytes());
        self.request(PacketType::GpioSetIrq, 0, &payload);
    }

    fn read(&self, iface: Interface, timeout: Duration) -> Option<Packet> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        match self.host.read(iface, &mut buf, Some(timeout)) {
            Ok(n) => Some(Packet::decode(&buf[..n]).unwrap()),
            Err(TransportError::Timeout) => None,
            Err(e) => panic!("read failed: {}", e),
        }
    }
}

mod header {
    use super::*;

    #[test]
    fn test_response_copies_type_and_sequence() {
        let mut rig = rig();
        let rsp = rig.request(PacketType::GpioGetValue, 77, &[5]);
        assert_eq!(rsp.packet_type(), Ok(PacketType::GpioGetValue));
        assert_eq!(rsp.sequence(), 77);
        assert_eq!(rsp.status(), Ok(Status::Rsp));
    }

    #[test]
    fn test_system_requests_answer_empty() {
        let mut rig = rig();
        for ty in [
            PacketType::SysInit,
            PacketType::SysDeinit,
            PacketType::SysGetFwVer,
        ] {
            let rsp = rig.request(ty, 1, &[]);
            assert_eq!(rsp.status(), Ok(Status::Rsp));
            assert!(rsp.is_empty());
        }
    }

    #[test]
    fn test_malformed_request_sets_err() {
        let mut rig = rig();
        // GPIO_SET_VALUE without its value byte
        let rsp = rig.request(PacketType::GpioSetValue, 3, &[10]);
        assert_eq!(rsp.status(), Ok(Status::Err));
    }

    #[test]
    fn test_invalid_pin_sets_err() {
        let mut rig = rig();
        let rsp = rig.request(PacketType::GpioGetValue, 3, &[30]);
        assert_eq!(rsp.status(), Ok(Status::Err));
    }

    #[test]
    fn test_hw_reset_reaches_board() {
        let mut rig = rig();
        rig.request(PacketType::SysHwReset, 9, &[]);
        assert_eq!(rig.board.system.resets(), 1);
    }
}

mod gpio {
    use super::*;

    #[test]
    fn test_set_value_echoes_pin_and_value() {
        let mut rig = rig();
        rig.request(PacketType::GpioInit, 1, &[10, 0, 1]);
        let rsp = rig.request(PacketType::GpioSetValue, 2, &[10, 1]);
        assert_eq!(rsp.status(), Ok(Status::Rsp));
        assert_eq!(rsp.payload(), &[10, 1]);
        assert!(rig.board.gpio.level(10));
    }

    #[test]
    fn test_get_value_reads_input() {
        let mut rig = rig();
        rig.request(PacketType::GpioInit, 1, &[4, 0, 0]);
        rig.board.gpio.set_input(4, true);
        let rsp = rig.request(PacketType::GpioGetValue, 2, &[4]);
        assert_eq!(rsp.payload(), &[1]);
    }

    #[test]
    fn test_irq_events_go_to_event_interface() {
        let mut rig = rig();
        let mask = (GpioEvents::RISE_EDGE | GpioEvents::FALL_EDGE).bits();
        let mut payload = vec![7, 1];
        payload.extend_from_slice(&mask.to_be_bytes());
        let rsp = rig.request(PacketType::GpioSetIrq, 1, &payload);
        assert_eq!(rsp.payload(), payload.as_slice());

        rig.board.gpio.set_input(7, true);
        rig.board.gpio.set_input(7, false);

        let event = rig.poll_event(PacketType::GpioEvent).expect("no event frame");
        assert_eq!(event.packet_type(), Ok(PacketType::GpioEvent));
        assert_eq!(event.read_u8(0), Ok(2));
        assert_eq!(event.read_u32(1), Ok((7 << 16) | GpioEvents::RISE_EDGE.bits()));
        assert_eq!(event.read_u32(5), Ok((7 << 16) | GpioEvents::FALL_EDGE.bits()));

        // Nothing is queued on the Data interface for event polls
        assert!(rig.read(Interface::Data, QUIET_TIMEOUT).is_none());
    }

    #[test]
    fn test_empty_event_poll_sends_nothing() {
        let mut rig = rig();
        assert!(rig.poll_event(PacketType::GpioEvent).is_none());
        assert!(rig.poll_event(PacketType::SerialEvent).is_none());
    }

    #[test]
    fn test_event_frame_holds_at_most_seven() {
        let mut rig = rig();
        rig.enable_irq(2);
        for _ in 0..8 {
            rig.board.gpio.trigger(2, GpioEvents::LEVEL_HIGH);
        }
        let first = rig.poll_event(PacketType::GpioEvent).unwrap();
        assert_eq!(first.read_u8(0), Ok(7));
        assert_eq!(first.payload_len(), 1 + 7 * 4);
        let second = rig.poll_event(PacketType::GpioEvent).unwrap();
        assert_eq!(second.read_u8(0), Ok(1));
    }

    #[test]
    fn test_pulse_in_measures_width() {
        let mut rig = rig();
        rig.request(PacketType::GpioInit, 1, &[6, 0, 0]);
        rig.board
            .gpio
            .schedule_pulse(6, true, Duration::from_millis(5));
        let mut payload = vec![6, 1];
        payload.extend_from_slice(&1_000_000u64.to_be_bytes());
        let rsp = rig.request(PacketType::GpioPulseIn, 2, &payload);
        let width = rsp.read_u64(0).unwrap();
        assert!((4_000..50_000).contains(&width), "width {}", width);
    }
}

mod spi {
    use super::*;

    #[test]
    fn test_transfer_with_loopback() {
        let mut rig = rig();
        rig.board.spi.set_loopback(0, true);
        let rsp = rig.request(PacketType::SpiTransfer, 1, &[0, 4, 1, 2, 3, 4]);
        assert_eq!(rsp.status(), Ok(Status::Rsp));
        assert_eq!(rsp.payload(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_short_write_reports_len_mismatch() {
        let mut rig = rig();
        rig.board.spi.limit_writes(1, Some(2));
        let rsp = rig.request(PacketType::SpiWrite, 1, &[1, 3, 9, 9, 9]);
        assert_eq!(rsp.status(), Ok(Status::SpiLenMismatch));
        assert_eq!(rig.board.spi.written(1), vec![9, 9]);
    }

    #[test]
    fn test_init_reports_actual_frequency() {
        let mut rig = rig();
        let mut payload = vec![0, 2, 3, 4, 5];
        payload.extend_from_slice(&100_000_000u32.to_be_bytes());
        let rsp = rig.request(PacketType::SpiInit, 1, &payload);
        assert_eq!(&rsp.payload()[..5], &[0, 2, 3, 4, 5]);
        assert_eq!(rsp.read_u32(5), Ok(62_500_000));
    }
}

mod i2c {
    use super::*;

    #[test]
    fn test_write_to_absent_slave_nacks() {
        let mut rig = rig();
        let rsp = rig.request(PacketType::I2cWrite, 1, &[0, 0x50, 1, 0, 0xaa]);
        assert_eq!(rsp.status(), Ok(Status::I2cNack));
    }

    #[test]
    fn test_stalled_slave_times_out() {
        let mut rig = rig();
        rig.board.i2c.add_device(0x20);
        rig.board.i2c.stall(0x20);
        let rsp = rig.request(PacketType::I2cRead, 1, &[0, 0x20, 2, 0]);
        assert_eq!(rsp.status(), Ok(Status::I2cTimeout));
    }

    #[test]
    fn test_write_then_read_back() {
        let mut rig = rig();
        rig.board.i2c.add_device(0x50);
        let rsp = rig.request(PacketType::I2cWrite, 1, &[0, 0x50, 3, 0, 0x10, 0xde, 0xad]);
        assert_eq!(rsp.status(), Ok(Status::Rsp));
        rig.request(PacketType::I2cWrite, 2, &[0, 0x50, 1, 1, 0x10]);
        let rsp = rig.request(PacketType::I2cRead, 3, &[0, 0x50, 2, 0]);
        assert_eq!(rsp.payload(), &[0xde, 0xad]);
    }

    #[test]
    fn test_oversized_read_overflows() {
        let mut rig = rig();
        rig.board.i2c.add_device(0x50);
        let rsp = rig.request(PacketType::I2cRead, 1, &[0, 0x50, 61, 0]);
        assert_eq!(rsp.status(), Ok(Status::I2cBufOverflow));
    }

    #[test]
    fn test_set_timeout_is_used() {
        let mut rig = rig();
        rig.board.i2c.add_device(0x50);
        rig.request(PacketType::I2cSetTimeout, 1, &5_000u32.to_be_bytes());
        rig.request(PacketType::I2cRead, 2, &[0, 0x50, 1, 0]);
        assert_eq!(
            rig.board.i2c.last_timeout(),
            Some(Duration::from_micros(5_000))
        );
    }
}

mod analog {
    use super::*;

    #[test]
    fn test_read_rescales_to_resolution() {
        let mut rig = rig();
        rig.board.analog.set_adc(1, 0x0abc);
        let rsp = rig.request(PacketType::AnalogRead, 1, &[1, 16]);
        assert_eq!(rsp.read_u8(0), Ok(1));
        assert_eq!(rsp.read_u16(1), Ok(0xabc0));
        let rsp = rig.request(PacketType::AnalogRead, 2, &[1, 8]);
        assert_eq!(rsp.read_u16(1), Ok(0xab));
    }

    #[test]
    fn test_temperature_enables_sensor() {
        let mut rig = rig();
        let rsp = rig.request(PacketType::AnalogInit, 1, &[0xF0, 0]);
        assert_eq!(rsp.payload(), &[0xF0, 0]);
        assert!(rig.board.analog.temp_sensor_enabled());

        rig.board.analog.set_adc(4, 876);
        let rsp = rig.request(PacketType::AnalogReadTemp, 2, &[]);
        let celsius = rsp.read_f32(0).unwrap();
        assert!((celsius - 27.0).abs() < 1.0, "got {}", celsius);
    }

    #[test]
    fn test_pwm_init_reports_slice_and_channel() {
        let mut rig = rig();
        let mut payload = vec![15, 1];
        payload.extend_from_slice(&65_535u32.to_be_bytes());
        payload.extend_from_slice(&1_000u64.to_be_bytes());
        let rsp = rig.request(PacketType::AnalogInit, 1, &payload);
        assert_eq!(rsp.status(), Ok(Status::Rsp));
        assert_eq!(&rsp.payload()[..2], &[15, 1]);
        assert_eq!(rsp.read_u32(2), Ok(65_535));
        assert_eq!(rsp.read_u64(6), Ok(1_000));
        assert_eq!(rsp.read_u8(14), Ok(7));
        assert_eq!(rsp.read_u8(15), Ok(1));
        assert_eq!(rig.board.analog.slice(7).wrap, 65_535);
    }

    #[test]
    fn test_write_sets_level_and_returns_duty() {
        let mut rig = rig();
        let mut payload = vec![15];
        payload.extend_from_slice(&7u32.to_be_bytes());
        payload.extend_from_slice(&255u16.to_be_bytes());
        payload.extend_from_slice(&999u32.to_be_bytes());
        payload.push(8);
        let rsp = rig.request(PacketType::AnalogWrite, 1, &payload);
        assert_eq!(rsp.read_f32(0), Ok(1.0));
        assert_eq!(rig.board.analog.level(15), Some(1_000));
        assert!(rig.board.analog.slice(7).enabled);
    }
}

mod serial {
    use super::*;

    fn init_uart(rig: &mut Rig, inst: u8) {
        let mut payload = vec![inst, 0, 1];
        payload.extend_from_slice(&115_200u32.to_be_bytes());
        let rsp = rig.request(PacketType::SerialInit, 1, &payload);
        assert_eq!(rsp.payload(), payload.as_slice());
    }

    #[test]
    fn test_putc_and_getc() {
        let mut rig = rig();
        init_uart(&mut rig, 0);
        let rsp = rig.request(PacketType::SerialPutc, 2, &[0, b'x']);
        assert_eq!(rsp.payload(), b"x");
        assert_eq!(rig.board.uart.transmitted(0), b"x");

        let rsp = rig.request(PacketType::SerialGetc, 3, &[0]);
        assert_eq!(rsp.status(), Ok(Status::SerialNotReadable));

        rig.board.uart.inject(0, b"y");
        let rsp = rig.request(PacketType::SerialGetc, 4, &[0]);
        assert_eq!(rsp.payload(), b"y");
    }

    #[test]
    fn test_write_to_blocked_uart_fails() {
        let mut rig = rig();
        init_uart(&mut rig, 1);
        rig.board.uart.block_tx(1, true);
        let rsp = rig.request(PacketType::SerialWrite, 2, &[1, 2, b'h', b'i']);
        assert_eq!(rsp.status(), Ok(Status::SerialNotWritable));
    }

    #[test]
    fn test_read_returns_buffered_bytes() {
        let mut rig = rig();
        init_uart(&mut rig, 0);
        rig.board.uart.inject(0, b"hello");
        let rsp = rig.request(PacketType::SerialRead, 2, &[0, 3]);
        assert_eq!(rsp.payload(), b"hel");
    }

    #[test]
    fn test_flow_control_mapping() {
        let mut rig = rig();
        init_uart(&mut rig, 0);
        let rsp = rig.request(PacketType::SerialSetFlowControl, 2, &[0, 2, 3, 3]);
        assert_eq!(rsp.payload(), &[0, 2, 3, 3]);
        assert_eq!(rig.board.uart.flow_control(0), (true, true));
        rig.request(PacketType::SerialSetFlowControl, 3, &[0, 2, 3, 2]);
        assert_eq!(rig.board.uart.flow_control(0), (false, true));
    }

    #[test]
    fn test_rx_irq_bytes_arrive_as_events() {
        let mut rig = rig();
        init_uart(&mut rig, 0);
        init_uart(&mut rig, 1);
        rig.request(PacketType::SerialSetIrq, 2, &[0, 1, 0]);
        rig.request(PacketType::SerialSetIrq, 3, &[1, 1, 0]);
        rig.board.uart.inject(0, b"ab");
        rig.board.uart.inject(1, b"c");

        let event = rig.poll_event(PacketType::SerialEvent).unwrap();
        assert_eq!(event.payload(), &[0, b'a', 0, b'b', 1, b'c']);
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn test_sw_reset_discards_queued_events() {
        let mut rig = rig();
        rig.enable_irq(3);
        rig.board.gpio.trigger(3, GpioEvents::RISE_EDGE);
        assert_eq!(rig.board.gpio.irq_mask(3), GpioEvents::ALL);
        let rsp = rig.request(PacketType::SysSwReset, 5, &[]);
        assert_eq!(rsp.packet_type(), Ok(PacketType::SysSwReset));
        assert_eq!(rsp.sequence(), 5);
        assert!(rig.poll_event(PacketType::GpioEvent).is_none());

        // Tasks are back in service
        let rsp = rig.request(PacketType::GpioGetValue, 6, &[3]);
        assert_eq!(rsp.status(), Ok(Status::Rsp));
    }

    #[test]
    fn test_sw_reset_clears_rx_queue() {
        let mut rig = rig();
        let rx = rig.dispatcher.rx_queue();
        rx.push(command_packet(PacketType::GpioGetValue, &[1]).as_bytes())
            .unwrap();
        rig.request(PacketType::SysSwReset, 1, &[]);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_stopped_dispatcher_is_silent() {
        let mut rig = rig();
        rig.dispatcher.state().set(firmware::TaskState::Stopped);
        rig.dispatcher
            .process(&command_packet(PacketType::GpioGetValue, &[1]));
        assert!(rig.read(Interface::Data, QUIET_TIMEOUT).is_none());
    }
}
