#![allow(dead_code)]

use core::future::{poll_fn, Future};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use core::task::Poll;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use embassy_futures::block_on;
use embassy_futures::select::{select, Either};
use embassy_futures::yield_now;
use embassy_time::{Duration, Instant};

use voxlink::drivers::{
    AudioStreamer, ClientState, CredentialStore, DeviceHooks, LinkDriver, OtaChannel,
    RegistrationRecord, SpeakerNotifier, TaskProbe, TransportDriver, VoiceSession,
};
use voxlink::events::{RecoveryStage, SessionDisconnectCode};
use voxlink::reconnect_manager::{Collaborators, ReconnectionController};
use voxlink::speaker_flow::{BufferState, SpeakerNotice};
use voxlink::system_state::ReconnectShared;
use voxlink::time::TimeSource;
use voxlink::ux::UxState;

/// Clock step per executor poll
pub const TICK_MS: u64 = 10;

/// Clock that only moves when the test driver advances it
#[derive(Default)]
pub struct ManualTime {
    now_ms: AtomicU64,
}

impl ManualTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Instant {
        Instant::from_millis(self.now_ms())
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await
    }

    async fn sleep_until(&self, deadline: Instant) {
        poll_fn(|_| {
            if self.now() >= deadline {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

/// Run `fut` to completion, advancing the manual clock by one tick per poll
pub fn drive<F: Future>(time: &ManualTime, fut: F) -> F::Output {
    block_on(async {
        let ticker = async {
            loop {
                yield_now().await;
                time.advance(TICK_MS);
            }
        };
        match select(fut, ticker).await {
            Either::First(output) => output,
            Either::Second(_) => unreachable!("ticker never finishes"),
        }
    })
}

/// Device hooks that record everything asked of them
#[derive(Default)]
pub struct RecordingHooks {
    stages: Mutex<Vec<RecoveryStage>>,
    resets: Mutex<Vec<String>>,
    ux: Mutex<Vec<UxState>>,
    pub reconnecting_audio: AtomicU32,
    pub offline_aborts: AtomicU32,
    pub clock_reverts: AtomicU32,
    pub clock_boosts: AtomicU32,
}

impl RecordingHooks {
    pub fn stages(&self) -> Vec<RecoveryStage> {
        self.stages.lock().unwrap().clone()
    }

    pub fn resets(&self) -> Vec<String> {
        self.resets.lock().unwrap().clone()
    }

    pub fn ux(&self) -> Vec<UxState> {
        self.ux.lock().unwrap().clone()
    }
}

impl DeviceHooks for RecordingHooks {
    fn reset(&self, reason: &str) {
        self.resets.lock().unwrap().push(reason.to_string());
    }

    fn revert_cpu_clock(&self) {
        self.clock_reverts.fetch_add(1, Ordering::SeqCst);
    }

    fn boost_cpu_clock(&self) {
        self.clock_boosts.fetch_add(1, Ordering::SeqCst);
    }

    fn enter_reconnecting_audio(&self) {
        self.reconnecting_audio.fetch_add(1, Ordering::SeqCst);
    }

    fn abort_offline_audio(&self) {
        self.offline_aborts.fetch_add(1, Ordering::SeqCst);
    }

    fn show(&self, state: UxState) {
        self.ux.lock().unwrap().push(state);
    }

    fn on_stage(&self, stage: RecoveryStage) {
        self.stages.lock().unwrap().push(stage);
        if let Some(state) = UxState::for_stage(stage) {
            self.show(state);
        }
    }
}

pub struct FakeLink<'t> {
    time: &'t ManualTime,
    pub reconnect_delay_ms: u64,
    pub fail: bool,
    pub reconnects: u32,
}

impl<'t> FakeLink<'t> {
    pub fn new(time: &'t ManualTime) -> Self {
        Self {
            time,
            reconnect_delay_ms: 0,
            fail: false,
            reconnects: 0,
        }
    }
}

impl LinkDriver for FakeLink<'_> {
    async fn reconnect(&mut self) -> Result<()> {
        self.reconnects += 1;
        if self.reconnect_delay_ms > 0 {
            self.time
                .sleep(Duration::from_millis(self.reconnect_delay_ms))
                .await;
        }
        if self.fail {
            Err(anyhow!("access point gone"))
        } else {
            Ok(())
        }
    }
}

pub struct FakeTransport<'t> {
    time: &'t ManualTime,
    pub connect_delay_ms: u64,
    pub hang_on_connect: bool,
    pub hang_on_disconnect: bool,
    pub fail_connect: bool,
    pub fail_resync: bool,
    pub raise_during_connect: Option<&'t ReconnectShared<'t>>,
    pub mid_cycle_raises: Vec<bool>,
    pub connects: u32,
    pub disconnects: u32,
    pub resyncs: u32,
}

impl<'t> FakeTransport<'t> {
    pub fn new(time: &'t ManualTime) -> Self {
        Self {
            time,
            connect_delay_ms: 0,
            hang_on_connect: false,
            hang_on_disconnect: false,
            fail_connect: false,
            fail_resync: false,
            raise_during_connect: None,
            mid_cycle_raises: Vec::new(),
            connects: 0,
            disconnects: 0,
            resyncs: 0,
        }
    }
}

impl TransportDriver for FakeTransport<'_> {
    async fn disconnect(&mut self) -> Result<()> {
        self.disconnects += 1;
        if self.hang_on_disconnect {
            core::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        self.connects += 1;
        if let Some(shared) = self.raise_during_connect {
            self.mid_cycle_raises
                .push(shared.raise_event(voxlink::ReconnectEvent::NetworkLoss));
        }
        if self.hang_on_connect {
            core::future::pending::<()>().await;
        }
        if self.connect_delay_ms > 0 {
            self.time
                .sleep(Duration::from_millis(self.connect_delay_ms))
                .await;
        }
        if self.fail_connect {
            Err(anyhow!("TLS handshake failed"))
        } else {
            Ok(())
        }
    }

    async fn resync_state(&mut self) -> Result<()> {
        self.resyncs += 1;
        if self.fail_resync {
            Err(anyhow!("shadow topic rejected"))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
pub struct FakeOta {
    pub connect_failures: u32,
    pub disconnect_failures: u32,
    pub hang_on_connect: bool,
    pub hang_on_disconnect: bool,
    pub connects: u32,
    pub disconnects: u32,
}

impl OtaChannel for FakeOta {
    async fn disconnect(&mut self) -> Result<()> {
        self.disconnects += 1;
        if self.hang_on_disconnect {
            core::future::pending::<()>().await;
        }
        if self.disconnect_failures > 0 {
            self.disconnect_failures -= 1;
            Err(anyhow!("jobs unsubscribe failed"))
        } else {
            Ok(())
        }
    }

    async fn connect(&mut self) -> Result<()> {
        self.connects += 1;
        if self.hang_on_connect {
            core::future::pending::<()>().await;
        }
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            Err(anyhow!("jobs subscribe failed"))
        } else {
            Ok(())
        }
    }
}

pub struct FakeSession {
    pub connected: bool,
    pub connect_failures: u32,
    pub fail_disconnect: bool,
    pub hang_on_connect: bool,
    pub hang_on_disconnect: bool,
    pub connects: u32,
    pub disconnect_codes: Vec<SessionDisconnectCode>,
    pub registrations: Vec<Option<String>>,
    pub syncs: Vec<(u8, Vec<String>)>,
    pub terminations: u32,
}

impl Default for FakeSession {
    fn default() -> Self {
        Self {
            connected: true,
            connect_failures: 0,
            fail_disconnect: false,
            hang_on_connect: false,
            hang_on_disconnect: false,
            connects: 0,
            disconnect_codes: Vec::new(),
            registrations: Vec::new(),
            syncs: Vec::new(),
            terminations: 0,
        }
    }
}

impl VoiceSession for FakeSession {
    async fn disconnect(&mut self, code: SessionDisconnectCode) -> Result<()> {
        self.disconnect_codes.push(code);
        if self.hang_on_disconnect {
            core::future::pending::<()>().await;
        }
        if self.fail_disconnect {
            Err(anyhow!("disconnect not acknowledged"))
        } else {
            self.connected = false;
            Ok(())
        }
    }

    async fn connect(&mut self, registration: Option<&RegistrationRecord>) -> Result<()> {
        self.connects += 1;
        self.registrations
            .push(registration.map(|record| record.client_id.clone()));
        if self.hang_on_connect {
            core::future::pending::<()>().await;
        }
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(anyhow!("service refused the connection"));
        }
        self.connected = true;
        Ok(())
    }

    async fn synchronize_state(&mut self, volume: u8, alert_tokens: &[String]) -> Result<()> {
        self.syncs.push((volume, alert_tokens.to_vec()));
        Ok(())
    }

    fn terminate_speaker(&mut self) {
        self.terminations += 1;
    }

    fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[derive(Default)]
pub struct FakeCredentials {
    pub missing: bool,
    pub loads: u32,
}

impl CredentialStore for FakeCredentials {
    fn load_registration(&mut self) -> Result<RegistrationRecord> {
        self.loads += 1;
        if self.missing {
            return Err(anyhow!("registration namespace empty"));
        }
        Ok(RegistrationRecord {
            client_id: "speaker-01".to_string(),
            topic_root: "ais/v1/speaker-01".to_string(),
            account_id: "123456789012".to_string(),
            shared_secret: "c2VjcmV0".to_string(),
        })
    }
}

pub struct FakeClient {
    pub volume: u8,
    pub tokens: Vec<String>,
}

impl Default for FakeClient {
    fn default() -> Self {
        Self {
            volume: 40,
            tokens: vec!["alarm-0700".to_string()],
        }
    }
}

impl ClientState for FakeClient {
    fn volume(&self) -> u8 {
        self.volume
    }

    fn pending_alert_tokens(&self) -> Vec<String> {
        self.tokens.clone()
    }
}

pub type FakeCollaborators<'t> = Collaborators<
    FakeLink<'t>,
    FakeTransport<'t>,
    FakeOta,
    FakeSession,
    FakeCredentials,
    FakeClient,
>;

pub type TestController<'t> = ReconnectionController<
    't,
    FakeLink<'t>,
    FakeTransport<'t>,
    FakeOta,
    FakeSession,
    FakeCredentials,
    FakeClient,
    &'t ManualTime,
    RecordingHooks,
>;

pub fn collaborators(time: &ManualTime) -> FakeCollaborators<'_> {
    Collaborators {
        link: FakeLink::new(time),
        transport: FakeTransport::new(time),
        ota: FakeOta::default(),
        session: FakeSession::default(),
        credentials: FakeCredentials::default(),
        client: FakeClient::default(),
    }
}

/// Playback streamer with scripted occupancy
#[derive(Default)]
pub struct FakeStreamer {
    pub queued: AtomicU32,
    pub queued_raw: AtomicU32,
    pub playing: AtomicBool,
    pub end_of_stream: AtomicBool,
    pub flush_on_stop: AtomicU32,
    pub starts: AtomicU32,
    pub stops: AtomicU32,
    pub discarded: AtomicU32,
    pub volume: AtomicU32,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl FakeStreamer {
    pub fn set_queued(&self, bytes: u32) {
        self.queued.store(bytes, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }
}

impl AudioStreamer for FakeStreamer {
    fn queued_bytes(&self) -> u32 {
        self.queued.load(Ordering::SeqCst)
    }

    fn queued_raw_bytes(&self) -> u32 {
        self.queued_raw.load(Ordering::SeqCst)
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.playing.store(true, Ordering::SeqCst);
    }

    fn stop(&self) -> u32 {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
        self.flush_on_stop.swap(0, Ordering::SeqCst)
    }

    fn set_volume(&self, volume: u8) {
        self.volume.store(u32::from(volume), Ordering::SeqCst);
    }

    fn write(&self, data: &[u8]) {
        self.writes.lock().unwrap().push(data.to_vec());
    }

    fn discard(&self, bytes: u32) {
        self.discarded.fetch_add(bytes, Ordering::SeqCst);
        let queued = self.queued.load(Ordering::SeqCst);
        self.queued
            .store(queued.saturating_sub(bytes), Ordering::SeqCst);
    }

    fn take_end_of_stream(&self) -> bool {
        self.end_of_stream.swap(false, Ordering::SeqCst)
    }
}

/// Notifier that keeps every delivered notice in order
#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<SpeakerNotice>>,
}

impl RecordingNotifier {
    pub fn delivered(&self) -> Vec<SpeakerNotice> {
        self.delivered.lock().unwrap().clone()
    }
}

impl SpeakerNotifier for RecordingNotifier {
    fn buffer_state_changed(&self, previous: BufferState, current: BufferState) {
        self.delivered
            .lock()
            .unwrap()
            .push(SpeakerNotice::BufferStateChanged { previous, current });
    }

    fn marker_encountered(&self, id: u32) {
        self.delivered
            .lock()
            .unwrap()
            .push(SpeakerNotice::MarkerEncountered(id));
    }

    fn speaker_opened(&self, offset: u64) {
        self.delivered
            .lock()
            .unwrap()
            .push(SpeakerNotice::SpeakerOpened(offset));
    }

    fn speaker_closed(&self, offset: u64) {
        self.delivered
            .lock()
            .unwrap()
            .push(SpeakerNotice::SpeakerClosed(offset));
    }

    fn speaker_state_cleared(&self) {
        self.delivered
            .lock()
            .unwrap()
            .push(SpeakerNotice::SpeakerStateCleared);
    }

    fn skip_speaker_sequence(&self, sequence: u32) {
        self.delivered
            .lock()
            .unwrap()
            .push(SpeakerNotice::SequenceSkipped(sequence));
    }
}

/// Receive task probe whose answer the test flips
#[derive(Default)]
pub struct ScriptedProbe {
    pub alive: AtomicBool,
    pub checks: AtomicU32,
}

impl TaskProbe for &ScriptedProbe {
    fn is_running(&self, _name: &str) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.alive.load(Ordering::SeqCst)
    }
}
