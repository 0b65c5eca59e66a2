/*
Copyright 2026  The bcm4377-cipc Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::sync::Arc;

use spin::Mutex;
use tracing::{Span, instrument};

use crate::boot::BootState;
use crate::bus::{Bus, DmaGuard};
use crate::config::{BoardInfo, DeviceConfiguration};
use crate::context::ContextBlock;
use crate::error::Result;
use crate::firmware::{FirmwareLoader, request_blob};
use crate::hci::{self, HciCommandSender, HciPacketType, HciSink};
use crate::hw::{ChipVariant, HwVariant};
use crate::invalid_arg;
use crate::metrics::{CounterMetric, EmittableMetric};
use crate::ring::cursors::STATE_SIZE;
use crate::ring::{
    CompletionRing, CompletionRingConfig, CompletionRingId, CursorBlock, RingIo, TransferRing,
    TransferRingConfig, TransferRingId,
};
use crate::wait::Event;

/// Boot stage and RTI status as last seen by the interrupt handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DeviceStatus {
    pub(crate) bootstage: u32,
    pub(crate) rti_status: u32,
}

/// One BCM4377-family controller.
///
/// Created at attach time with every ring allocated but unknown to the
/// device. [`Bcm4377::boot`] brings the firmware up to the point where the
/// control rings work, [`Bcm4377::open`] creates the data rings and
/// [`Bcm4377::send`] queues HCI frames. The platform calls
/// [`Bcm4377::handle_interrupt`] whenever the device interrupts.
pub struct Bcm4377<B: Bus> {
    pub(crate) bus: B,
    pub(crate) hw: &'static HwVariant,
    pub(crate) board: BoardInfo,
    pub(crate) board_type: String,
    pub(crate) config: DeviceConfiguration,
    pub(crate) cursors: CursorBlock,
    pub(crate) context: ContextBlock,
    pub(crate) completion_rings: Vec<CompletionRing>,
    pub(crate) transfer_rings: Vec<TransferRing>,
    pub(crate) sink: Arc<dyn HciSink>,
    pub(crate) boot_state: Mutex<BootState>,
    pub(crate) status: Mutex<DeviceStatus>,
    /// Raised by the interrupt handler when [`DeviceStatus`] changes
    pub(crate) status_changed: Event,
}

/// Frees what was allocated so far if attach fails half way.
struct RingGuard<'a, B: Bus> {
    bus: &'a B,
    completion: Vec<CompletionRing>,
    transfer: Vec<TransferRing>,
}

impl<B: Bus> RingGuard<'_, B> {
    fn into_parts(mut self) -> (Vec<CompletionRing>, Vec<TransferRing>) {
        (
            std::mem::take(&mut self.completion),
            std::mem::take(&mut self.transfer),
        )
    }
}

impl<B: Bus> Drop for RingGuard<'_, B> {
    fn drop(&mut self) {
        self.completion.iter().for_each(|r| r.free(self.bus));
        self.transfer.iter().for_each(|r| r.free(self.bus));
    }
}

impl<B: Bus> Bcm4377<B> {
    /// Allocate every ring and the shared blocks, program the vendor
    /// config space and resolve the board type.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn new(
        bus: B,
        variant: ChipVariant,
        board: BoardInfo,
        config: DeviceConfiguration,
        sink: Arc<dyn HciSink>,
    ) -> Result<Self> {
        let hw = variant.hw();
        let board_type = board
            .board_type
            .clone()
            .or_else(|| hw.board_type.map(String::from))
            .ok_or_else(|| invalid_arg!("unable to determine board type"))?;

        let mut rings = RingGuard {
            bus: &bus,
            completion: Vec::with_capacity(CompletionRingId::ALL.len()),
            transfer: Vec::with_capacity(TransferRingId::ALL.len()),
        };
        for id in CompletionRingId::ALL {
            let cfg = CompletionRingConfig::for_ring(id, config.interrupt_moderation_delay());
            rings.completion.push(CompletionRing::alloc(&bus, cfg)?);
        }
        for id in TransferRingId::ALL {
            rings
                .transfer
                .push(TransferRing::alloc(&bus, TransferRingConfig::for_ring(id))?);
        }

        let state = DmaGuard::alloc(&bus, STATE_SIZE)?;
        let cursors = CursorBlock::new(*state);
        let context = ContextBlock::alloc(
            &bus,
            &cursors,
            &rings.completion[CompletionRingId::ControlAck.index()],
            &rings.transfer[TransferRingId::Control.index()],
        )?;
        if let Err(e) = hw.init_config_space(&bus) {
            context.free(&bus);
            return Err(e);
        }

        let _ = state.dismiss();
        let (completion_rings, transfer_rings) = rings.into_parts();
        Ok(Self {
            bus,
            hw,
            board,
            board_type,
            config,
            cursors,
            context,
            completion_rings,
            transfer_rings,
            sink,
            boot_state: Mutex::new(BootState::PoweredOff),
            status: Mutex::new(DeviceStatus::default()),
            status_changed: Event::new(),
        })
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn hw(&self) -> &'static HwVariant {
        self.hw
    }

    pub fn board_type(&self) -> &str {
        &self.board_type
    }

    pub fn config(&self) -> &DeviceConfiguration {
        &self.config
    }

    pub fn boot_state(&self) -> BootState {
        *self.boot_state.lock()
    }

    pub fn completion_ring(&self, id: CompletionRingId) -> &CompletionRing {
        &self.completion_rings[id.index()]
    }

    pub fn transfer_ring(&self, id: TransferRingId) -> &TransferRing {
        &self.transfer_rings[id.index()]
    }

    pub(crate) fn io(&self) -> RingIo<'_, B> {
        RingIo::new(&self.bus, self.cursors, self.config.wait_timeout())
    }

    /// Queue an outbound HCI frame on the matching transfer ring. Never
    /// blocks.
    pub fn send(&self, kind: HciPacketType, frame: &[u8]) -> Result<()> {
        let ring = match kind {
            HciPacketType::Command => TransferRingId::HciH2d,
            HciPacketType::AclData => TransferRingId::AclH2d,
            HciPacketType::ScoData => TransferRingId::ScoH2d,
            HciPacketType::Event | HciPacketType::IsoData => {
                return Err(invalid_arg!("cannot send {} packets", kind.name()));
            }
        };

        match self.transfer_ring(ring).enqueue(&self.io(), frame, false) {
            Ok(()) => {
                CounterMetric::tx_packet(kind.name()).emit();
                CounterMetric::tx_bytes(kind.name(), frame.len()).emit();
                Ok(())
            }
            Err(e) => {
                CounterMetric::tx_error(kind.name()).emit();
                Err(e)
            }
        }
    }

    /// Vendor setup run by the HCI stack after open: calibration data
    /// first, then the PTB blob.
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn setup(&self, sender: &dyn HciCommandSender, loader: &dyn FirmwareLoader) -> Result<()> {
        self.hw.send_calibration(sender, &self.board)?;
        let ptb = request_blob(loader, self.hw, &self.board_type, &self.board, "ptb")?;
        self.hw.send_ptb(sender, &ptb)
    }

    pub fn set_bdaddr(&self, sender: &dyn HciCommandSender, bdaddr: &[u8; 6]) -> Result<()> {
        hci::set_bdaddr(sender, bdaddr)
    }
}

impl<B: Bus> Drop for Bcm4377<B> {
    fn drop(&mut self) {
        self.completion_rings.iter().for_each(|r| r.free(&self.bus));
        self.transfer_rings.iter().for_each(|r| r.free(&self.bus));
        self.context.free(&self.bus);
        self.bus.free_dma(self.cursors.buf());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::error::CipcError;
    use crate::firmware::tests::MapLoader;
    use crate::hci::tests::RecordingSender;
    use crate::hci::{OP_SEND_CALIBRATION, OP_SEND_PTB_CHUNK};
    use crate::ring::RingStatus;
    use crate::testing::{DeviceOptions, FakeBus, RecordingSink, SimDevice};

    pub(crate) const FIRMWARE: &str = "brcm/brcmbt4377b1-apple,formosa-u.bin";

    pub(crate) fn board() -> BoardInfo {
        BoardInfo {
            stepping: "b1".into(),
            vendor: "u".into(),
            ..Default::default()
        }
    }

    pub(crate) fn loader() -> MapLoader {
        MapLoader::with(&[(FIRMWARE, &[0x42; 4096][..])])
    }

    /// A device with a simulated controller attached, booted and opened
    /// unless told otherwise.
    pub(crate) struct Harness {
        pub(crate) sink: Arc<RecordingSink>,
        pub(crate) dev: Arc<Bcm4377<FakeBus>>,
        pub(crate) sim: SimDevice,
    }

    impl Harness {
        pub(crate) fn attach(opts: DeviceOptions, timeout: Duration) -> Self {
            let bus = FakeBus::new();
            let sink = Arc::new(RecordingSink::default());
            let mut config = DeviceConfiguration::default();
            config.set_wait_timeout(timeout);
            let dev = Arc::new(
                Bcm4377::new(bus.clone(), ChipVariant::Bcm4377, board(), config, sink.clone())
                    .unwrap(),
            );
            let sim = SimDevice::spawn(bus, opts, {
                let dev = dev.clone();
                move || {
                    dev.handle_interrupt();
                }
            });
            Self { sink, dev, sim }
        }

        pub(crate) fn open() -> Self {
            let h = Self::attach(DeviceOptions::default(), Duration::from_secs(5));
            h.dev.boot(&loader()).unwrap();
            h.dev.open().unwrap();
            h
        }
    }

    /// Poll `cond` until it holds or a few seconds pass.
    pub(crate) fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn board_type_falls_back_to_the_chip_default() {
        let bus = FakeBus::new();
        let sink = Arc::new(RecordingSink::default());
        let dev = Bcm4377::new(
            bus.clone(),
            ChipVariant::Bcm4377,
            board(),
            DeviceConfiguration::default(),
            sink.clone(),
        )
        .unwrap();
        assert_eq!(dev.board_type(), "apple,formosa");
        assert_eq!(dev.boot_state(), BootState::PoweredOff);
        // config space was programmed at attach
        assert_eq!(bus.config(0x80), 0x1800b000);

        let err = Bcm4377::new(
            FakeBus::new(),
            ChipVariant::Bcm4378,
            board(),
            DeviceConfiguration::default(),
            sink,
        );
        assert!(matches!(err, Err(CipcError::InvalidArgument(_))));
    }

    #[test]
    fn dropping_the_device_frees_its_memory() {
        let bus = FakeBus::new();
        let dev = Bcm4377::new(
            bus.clone(),
            ChipVariant::Bcm4377,
            board(),
            DeviceConfiguration::default(),
            Arc::new(RecordingSink::default()),
        )
        .unwrap();
        drop(dev);
        // 5 completion rings, 5 slotted transfer rings plus 2 pools, state,
        // context and peripheral info
        assert_eq!(bus.freed().len(), 5 + 5 + 2 + 3);
    }

    #[test]
    fn attach_failure_releases_partial_allocations() {
        let bus = FakeBus::with_arena(64 * 1024);
        let res = Bcm4377::new(
            bus.clone(),
            ChipVariant::Bcm4377,
            board(),
            DeviceConfiguration::default(),
            Arc::new(RecordingSink::default()),
        );
        assert!(matches!(res, Err(CipcError::Bus(_))));
        assert!(!bus.freed().is_empty());
    }

    #[test]
    fn frames_reach_their_rings() {
        let h = Harness::open();

        h.dev.send(HciPacketType::Command, &[0x03, 0x0c, 0x00]).unwrap();
        h.dev.send(HciPacketType::AclData, &[0x22; 600]).unwrap();
        assert!(eventually(|| h.sim.received().len() == 2));

        let received = h.sim.received();
        assert_eq!(received[0], (TransferRingId::HciH2d, vec![0x03, 0x0c, 0x00]));
        assert_eq!(received[1], (TransferRingId::AclH2d, vec![0x22; 600]));
        assert!(eventually(|| {
            h.dev.transfer_ring(TransferRingId::HciH2d).in_flight() == 0
                && h.dev.transfer_ring(TransferRingId::AclH2d).in_flight() == 0
        }));
    }

    #[test]
    fn sco_frames_use_the_polled_ring() {
        let h = Harness::open();
        h.dev.send(HciPacketType::ScoData, &[1, 2, 3]).unwrap();
        let ring = h.dev.transfer_ring(TransferRingId::ScoH2d);
        assert_eq!(ring.in_flight(), 1);
        // sync rings are never rung
        assert!(!h.dev.bus().doorbells().contains(&(6, 1)));
    }

    #[test]
    fn unsupported_packet_types_are_rejected() {
        let h = Harness::open();
        for kind in [HciPacketType::Event, HciPacketType::IsoData] {
            assert!(matches!(
                h.dev.send(kind, &[0]),
                Err(CipcError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn send_before_open_fails() {
        let h = Harness::attach(DeviceOptions::default(), Duration::from_secs(5));
        assert!(matches!(
            h.dev.send(HciPacketType::Command, &[0]),
            Err(CipcError::RingState { .. })
        ));
    }

    #[test]
    fn setup_uploads_ptb_in_one_command_on_4377() {
        let h = Harness::attach(DeviceOptions::default(), Duration::from_secs(5));
        let loader = MapLoader::with(&[("brcm/brcmbt4377b1-apple,formosa.ptb", &[7u8; 300][..])]);
        let sender = RecordingSender::default();

        h.dev.setup(&sender, &loader).unwrap();
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, crate::hci::OP_SEND_PTB);
        assert_eq!(sent[0].1.len(), 300);
    }

    #[test]
    fn setup_on_4387_sends_calibration_then_chunked_ptb() {
        let bus = FakeBus::new();
        let board = BoardInfo {
            board_type: Some("apple,kyoto".into()),
            stepping: "c2".into(),
            vendor: "m".into(),
            taurus_cal: None,
            taurus_beamforming_cal: Some(vec![9; 0xe6 + 1]),
        };
        let dev = Bcm4377::new(
            bus,
            ChipVariant::Bcm4387,
            board,
            DeviceConfiguration::default(),
            Arc::new(RecordingSink::default()),
        )
        .unwrap();
        let loader = MapLoader::with(&[("brcm/brcmbt4387c2-apple,kyoto-m.ptb", &[1u8; 0xcf * 2][..])]);
        let sender = RecordingSender::default();

        dev.setup(&sender, &loader).unwrap();
        let opcodes: Vec<u16> = sender.sent.lock().unwrap().iter().map(|(op, _)| *op).collect();
        assert_eq!(
            opcodes,
            [
                OP_SEND_CALIBRATION,
                OP_SEND_CALIBRATION,
                OP_SEND_PTB_CHUNK,
                OP_SEND_PTB_CHUNK
            ]
        );
    }

    #[test]
    fn setup_without_ptb_fails() {
        let h = Harness::attach(DeviceOptions::default(), Duration::from_secs(5));
        let sender = RecordingSender::default();
        assert!(matches!(
            h.dev.setup(&sender, &MapLoader::default()),
            Err(CipcError::FirmwareNotFound(_))
        ));
    }

    #[test]
    fn tx_metrics_follow_send_outcome() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let h = Harness::open();
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            h.dev.send(HciPacketType::Command, &[0; 4]).unwrap();
            let _ = h.dev.send(HciPacketType::Command, &[0; 1000]);
        });

        let counters: Vec<(String, u64)> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(c) => Some((key.key().name().to_string(), c)),
                _ => None,
            })
            .collect();
        for (name, expected) in [
            ("bcm4377_tx_packets_total", 1),
            ("bcm4377_tx_bytes_total", 4),
            ("bcm4377_tx_errors_total", 1),
        ] {
            assert!(
                counters.contains(&(name.to_string(), expected)),
                "{name} in {counters:?}"
            );
        }
        assert_eq!(
            h.dev.transfer_ring(TransferRingId::HciH2d).status(),
            RingStatus::Enabled
        );
    }
}
