// Speaker Flow Control Module
// Keeps the playback ring buffer within bounds and reports sustained buffer transitions
// Runs synchronously inside the audio tick and the voice service callbacks; nothing here awaits

use core::cell::RefCell;

// Import Embassy synchronization primitives for interrupt-safe shared state
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

// Import Embassy time utilities
use embassy_time::Instant;

// Import logging macros with consistent emoji prefixes
use log::{debug, info, warn};

use crate::config::FlowConfig;
use crate::drivers::{AudioStreamer, DeviceHooks, SpeakerNotifier};
use crate::echo_markers::EchoMarkers;
use crate::events::ReconnectEvent;
use crate::system_state::ReconnectShared;
use crate::time::window_elapsed;

// Default playback volume until the service sets one
const DEFAULT_VOLUME: u8 = 60;

/// Occupancy of the playback ring buffer as reported to the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Good,
    Overrun,
    OverrunWarning,
    Underrun,
    UnderrunWarning,
}

/// Microphone path state as seen by the speaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicState {
    Idle,      // Nothing captured, speaker may start
    Recording, // Streaming an utterance, playback is being barged in on
    Busy,      // Wake word verification or stopping
}

/// Stream offsets of the current speaker session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpeakerOffsets {
    pub start: u64,
    pub end: u64,
    pub written: u64,
    pub frames_flushed: u32,
}

impl SpeakerOffsets {
    /// Every byte up to the announced end offset has been written
    pub fn data_complete(&self) -> bool {
        self.end > 0 && self.written >= self.end
    }
}

/// Outbound event produced by the flow controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerNotice {
    BufferStateChanged {
        previous: BufferState,
        current: BufferState,
    },
    MarkerEncountered(u32),
    SpeakerOpened(u64),
    SpeakerClosed(u64),
    SpeakerStateCleared,
    SequenceSkipped(u32),
}

/// Copy of the speaker state for diagnostics and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerSnapshot {
    pub buffer_state: BufferState,
    pub previous_buffer_state: BufferState,
    pub offsets: SpeakerOffsets,
    pub open: bool,
    pub open_sent: bool,
    pub barge_in: bool,
    pub overrun_sequence: u32,
    pub volume: u8,
    pub open_timer_armed: bool,
    pub pending_markers: Vec<u64>,
}

struct SpeakerState {
    buffer_state: BufferState,
    previous_buffer_state: BufferState,
    offsets: SpeakerOffsets,
    open: bool,
    open_sent: bool,
    barge_in: bool,
    overrun_sequence: u32,
    volume: u8,
    markers: EchoMarkers,
    underrun_warning_at: Option<Instant>,
    overrun_warning_at: Option<Instant>,
    open_timer: Option<Instant>,
}

impl SpeakerState {
    fn new() -> Self {
        Self {
            buffer_state: BufferState::UnderrunWarning,
            previous_buffer_state: BufferState::UnderrunWarning,
            offsets: SpeakerOffsets::default(),
            open: false,
            open_sent: false,
            barge_in: false,
            overrun_sequence: 0,
            volume: DEFAULT_VOLUME,
            markers: EchoMarkers::new(),
            underrun_warning_at: None,
            overrun_warning_at: None,
            open_timer: None,
        }
    }

    fn transition(&mut self, fx: &mut Effects, next: BufferState, notify: bool, buffered: u32) {
        self.previous_buffer_state = self.buffer_state;
        self.buffer_state = next;

        if notify {
            fx.notices.push(SpeakerNotice::BufferStateChanged {
                previous: self.previous_buffer_state,
                current: next,
            });
        } else {
            info!(
                "🔈 Buffer state {:?} -> {:?} ({} bytes buffered)",
                self.previous_buffer_state, next, buffered
            );
        }
    }
}

// Side effects gathered under the state lock and delivered once it is released
#[derive(Default)]
struct Effects {
    notices: Vec<SpeakerNotice>,
    boost_clock: bool,
    revert_clock: bool,
    open_timed_out: Option<Instant>,
}

/// Buffer state the flow controller moves to for the given occupancy.
///
/// `playing` means the streamer is playing and "speaker opened" has been sent. Once all data of
/// the stream has arrived the state is frozen. A full buffer is left to the overflow callback.
pub fn resolve_buffer_state(
    config: &FlowConfig,
    buffered: u32,
    current: BufferState,
    playing: bool,
    data_complete: bool,
) -> BufferState {
    if playing {
        if data_complete {
            return current;
        }
        match buffered {
            0 => BufferState::Underrun,
            b if b < config.underrun_threshold => BufferState::UnderrunWarning,
            b if b < config.overrun_threshold => BufferState::Good,
            b if b < config.buffer_capacity => BufferState::OverrunWarning,
            _ => current,
        }
    } else if buffered >= config.overrun_threshold {
        current
    } else if buffered < config.underrun_threshold {
        BufferState::UnderrunWarning
    } else {
        BufferState::Good
    }
}

/// Speaker buffer flow controller
pub struct SpeakerFlowController<'a, A, N, H> {
    state: Mutex<CriticalSectionRawMutex, RefCell<SpeakerState>>,
    streamer: A,
    notifier: N,
    hooks: &'a H,
    reconnect: &'a ReconnectShared<'a>,
    config: FlowConfig,
}

impl<'a, A, N, H> SpeakerFlowController<'a, A, N, H>
where
    A: AudioStreamer,
    N: SpeakerNotifier,
    H: DeviceHooks,
{
    pub fn new(
        streamer: A,
        notifier: N,
        hooks: &'a H,
        reconnect: &'a ReconnectShared<'a>,
        config: FlowConfig,
    ) -> Self {
        Self {
            state: Mutex::new(RefCell::new(SpeakerState::new())),
            streamer,
            notifier,
            hooks,
            reconnect,
            config,
        }
    }

    pub fn streamer(&self) -> &A {
        &self.streamer
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Audio tick: echo markers, flow control, stop, start and the open-speaker timeout,
    /// in that order. Returns the notices sent this tick.
    pub fn tick(&self, now: Instant, mic: MicState) -> Vec<SpeakerNotice> {
        let fx = self.with_state(|s, fx| {
            self.check_echo_markers(s, fx);
            self.flow_control(s, fx, now, mic);
            self.stop_if_finished(s, fx);
            self.start_if_ready(s, fx, mic);
            self.check_open_timeout(s, fx, now);
        });
        self.deliver(fx)
    }

    /// OpenSpeaker directive
    pub fn open_speaker(&self, offset: u64, now: Instant) {
        let fx = self.with_state(|s, fx| {
            let frame = u64::from(self.config.opus_frame_bytes);
            let data = u64::from(self.config.opus_data_bytes);

            // Leftovers of a barged-in stream are still queued ahead of the new one
            let streamer_offset = offset / data * frame;
            let streamer_end = s.offsets.end / data * frame;
            let flushed = u64::from(s.offsets.frames_flushed) * frame;
            let stale = streamer_offset
                .saturating_sub(streamer_end)
                .saturating_sub(flushed);
            if stale > 0 && streamer_end > 0 {
                info!("🔈 Dropping {} stale speaker bytes", stale);
                self.streamer
                    .discard(u32::try_from(stale).unwrap_or(u32::MAX));
            }

            info!("🔈 OpenSpeaker at offset {}", offset);
            s.open = true;
            s.offsets.start = offset;
            s.offsets.end = 0;
            s.offsets.frames_flushed = 0;
            s.open_timer = Some(now);
            fx.boost_clock = true;
        });
        self.deliver(fx);
    }

    /// CloseSpeaker directive. `immediate` means the user barged in.
    pub fn close_speaker(&self, offset: u64, immediate: bool) {
        self.with_state(|s, _| {
            if immediate {
                info!("🔈 CloseSpeaker (immediately)");
            } else {
                info!("🔈 CloseSpeaker at offset {}", offset);
            }

            if s.open {
                if immediate {
                    s.barge_in = true;
                } else {
                    s.offsets.end = offset;
                }
            }
        });
    }

    /// Drop everything in flight. Used when the session is torn down.
    pub fn terminate_speaker(&self) {
        let fx = self.with_state(|s, fx| {
            info!("🔈 Resetting speaker playback");
            self.streamer.stop();
            s.open = false;
            s.open_timer = None;
            s.markers.clear();
            fx.notices.push(SpeakerNotice::SpeakerStateCleared);
        });
        self.deliver(fx);
    }

    /// Speaker data message: `frame_count + 1` equally sized frames starting at `offset`.
    /// Returns the new written offset.
    pub fn write_speaker_data(&self, audio: &[u8], offset: u64, frame_count: u8) -> u64 {
        self.state.lock(|cell| {
            let mut s = cell.borrow_mut();
            let frames = usize::from(frame_count) + 1;
            let frame_size = audio.len() / frames;
            s.open_timer = None;

            if frame_size == 0 {
                warn!(
                    "⚠️ Speaker message of {} bytes too short for {} frames",
                    audio.len(),
                    frames
                );
                return s.offsets.written;
            }

            let mut written = offset;
            for frame in audio.chunks_exact(frame_size).take(frames) {
                if self.config.length_prefixed_frames {
                    self.streamer.write(&(frame_size as u32).to_le_bytes());
                }
                self.streamer.write(frame);
                written += frame_size as u64;
            }
            s.offsets.written = written;
            written
        })
    }

    /// Producer could not fit a speaker message into the ring buffer
    pub fn speaker_overflow(&self, sequence: u32) -> Vec<SpeakerNotice> {
        let fx = self.with_state(|s, fx| {
            warn!("⚠️ Speaker overflow detected, sequence: {}", sequence);

            if s.open {
                s.transition(fx, BufferState::Overrun, true, 0);
                s.overrun_sequence = sequence;
            } else {
                fx.notices.push(SpeakerNotice::SequenceSkipped(sequence));
            }

            if !self.streamer.is_playing() {
                self.drop_half_of_queue();
            }
        });
        self.deliver(fx)
    }

    /// Register an echo request at the current written offset
    pub fn add_echo_marker(&self, id: u32) {
        self.with_state(|s, _| {
            info!("🔖 Speaker marker received: {}", id);
            let target = s.offsets.written;
            s.markers.insert(id, target);
        });
    }

    /// Free space in the ring buffer
    pub fn available_buffer(&self) -> u32 {
        self.config
            .buffer_capacity
            .saturating_sub(self.streamer.queued_bytes())
    }

    /// Offset actually heard by the user, for volume-changed reports. Zero when closed.
    pub fn playback_offset(&self) -> u64 {
        self.with_state_ref(|s| {
            if s.open {
                s.offsets
                    .written
                    .saturating_sub(u64::from(self.streamer.queued_raw_bytes()))
            } else {
                0
            }
        })
    }

    pub fn set_volume(&self, volume: u8) {
        self.with_state(|s, _| s.volume = volume);
        self.streamer.set_volume(volume);
    }

    pub fn volume(&self) -> u8 {
        self.with_state_ref(|s| s.volume)
    }

    pub fn snapshot(&self) -> SpeakerSnapshot {
        self.with_state_ref(|s| SpeakerSnapshot {
            buffer_state: s.buffer_state,
            previous_buffer_state: s.previous_buffer_state,
            offsets: s.offsets,
            open: s.open,
            open_sent: s.open_sent,
            barge_in: s.barge_in,
            overrun_sequence: s.overrun_sequence,
            volume: s.volume,
            open_timer_armed: s.open_timer.is_some(),
            pending_markers: s.markers.pending_targets(),
        })
    }

    fn with_state<F>(&self, f: F) -> Effects
    where
        F: FnOnce(&mut SpeakerState, &mut Effects),
    {
        let mut fx = Effects::default();
        self.state.lock(|cell| f(&mut cell.borrow_mut(), &mut fx));
        fx
    }

    fn with_state_ref<R>(&self, f: impl FnOnce(&SpeakerState) -> R) -> R {
        self.state.lock(|cell| f(&cell.borrow()))
    }

    fn deliver(&self, fx: Effects) -> Vec<SpeakerNotice> {
        for notice in &fx.notices {
            match *notice {
                SpeakerNotice::BufferStateChanged { previous, current } => {
                    info!("📤 BufferStateChanged {:?} -> {:?}", previous, current);
                    self.notifier.buffer_state_changed(previous, current)
                }
                SpeakerNotice::MarkerEncountered(id) => self.notifier.marker_encountered(id),
                SpeakerNotice::SpeakerOpened(offset) => self.notifier.speaker_opened(offset),
                SpeakerNotice::SpeakerClosed(offset) => self.notifier.speaker_closed(offset),
                SpeakerNotice::SpeakerStateCleared => self.notifier.speaker_state_cleared(),
                SpeakerNotice::SequenceSkipped(seq) => self.notifier.skip_speaker_sequence(seq),
            }
        }

        if fx.boost_clock {
            self.hooks.boost_cpu_clock();
        }
        if fx.revert_clock {
            self.hooks.revert_cpu_clock();
        }

        // Raised outside the lock; the timer only clears once the controller took the event
        if let Some(armed_at) = fx.open_timed_out {
            if self.reconnect.raise_event(ReconnectEvent::SessionDisconnect) {
                warn!(
                    "⚠️ OpenSpeaker timeout, no speaker message for {}ms",
                    self.config.open_speaker_timeout_ms
                );
                self.with_state(|s, _| {
                    if s.open_timer == Some(armed_at) {
                        s.open_timer = None;
                    }
                });
            }
        }

        fx.notices
    }

    fn check_echo_markers(&self, s: &mut SpeakerState, fx: &mut Effects) {
        if !self.streamer.is_playing() {
            return;
        }
        let progress = s
            .offsets
            .written
            .saturating_sub(u64::from(self.streamer.queued_raw_bytes()));
        for id in s.markers.take_reached(progress) {
            fx.notices.push(SpeakerNotice::MarkerEncountered(id));
        }
    }

    fn flow_control(&self, s: &mut SpeakerState, fx: &mut Effects, now: Instant, mic: MicState) {
        let buffered = self.streamer.queued_bytes();
        let playing = self.streamer.is_playing() && s.open_sent;

        if !playing && buffered >= self.config.overrun_threshold && mic == MicState::Recording {
            self.drop_half_of_queue();
        }

        let current = s.buffer_state;
        let next = resolve_buffer_state(
            &self.config,
            buffered,
            current,
            playing,
            s.offsets.data_complete(),
        );
        if next == current {
            return;
        }

        let window = self.config.warning_debounce();
        let notify = match next {
            BufferState::Underrun | BufferState::Overrun => true,
            BufferState::UnderrunWarning => {
                let from_above = matches!(
                    current,
                    BufferState::Good | BufferState::Overrun | BufferState::OverrunWarning
                );
                if playing && from_above {
                    // Inside the window the state holds so a later tick can still report it
                    if !window_elapsed(s.underrun_warning_at, now, window) {
                        return;
                    }
                    s.underrun_warning_at = Some(now);
                    true
                } else {
                    false
                }
            }
            BufferState::OverrunWarning => {
                let from_below = matches!(
                    current,
                    BufferState::Underrun | BufferState::UnderrunWarning | BufferState::Good
                );
                if playing && from_below {
                    if !window_elapsed(s.overrun_warning_at, now, window) {
                        return;
                    }
                    s.overrun_warning_at = Some(now);
                    true
                } else {
                    false
                }
            }
            BufferState::Good => false,
        };

        s.transition(fx, next, notify, buffered);
    }

    fn stop_if_finished(&self, s: &mut SpeakerState, fx: &mut Effects) {
        if self.streamer.take_end_of_stream() {
            info!("🔇 Stopping streamer playback");
            self.streamer.stop();

            if s.offsets.data_complete() {
                s.open = false;
                s.open_sent = false;
                fx.notices
                    .push(SpeakerNotice::SpeakerClosed(s.offsets.written));
                fx.notices.push(SpeakerNotice::SpeakerStateCleared);
                s.buffer_state = BufferState::UnderrunWarning;
                fx.revert_clock = true;
                info!("🔈 Exiting speaker state");
            }
        } else if s.barge_in && s.open {
            if self.streamer.is_playing() {
                info!("🔇 Stopping streamer playback on barge-in");
                let flushed = self.streamer.stop();
                if flushed > 0 {
                    self.track_flushed(s, flushed);
                }
            }

            s.barge_in = false;
            s.open = false;
            s.open_sent = false;

            if s.offsets.written == s.offsets.start {
                s.offsets.written += 1;
            }
            s.offsets.end = s.offsets.written;
            fx.notices
                .push(SpeakerNotice::SpeakerClosed(s.offsets.written));
        }
    }

    // Flushed audio was never heard, so the written offset moves back by its payload
    fn track_flushed(&self, s: &mut SpeakerState, flushed_bytes: u32) {
        debug!("🔇 Flushed {} bytes from the streamer", flushed_bytes);
        s.offsets.frames_flushed = flushed_bytes / self.config.opus_frame_bytes;
        let unplayed =
            u64::from(s.offsets.frames_flushed) * u64::from(self.config.opus_data_bytes);
        s.offsets.written = s.offsets.written.saturating_sub(unplayed);
    }

    fn start_if_ready(&self, s: &mut SpeakerState, fx: &mut Effects, mic: MicState) {
        if !s.open || self.streamer.is_playing() || mic != MicState::Idle {
            return;
        }

        let buffered = self.streamer.queued_bytes();
        let expected = if s.offsets.end > 0 {
            s.offsets.end.saturating_sub(s.offsets.start)
        } else {
            0
        };

        let threshold_met = buffered > self.config.start_threshold;
        let all_collected = expected > 0 && u64::from(buffered) >= expected;
        let end_reached = s.offsets.data_complete();

        if threshold_met || all_collected || end_reached {
            info!("🔊 Starting streamer playback");
            self.streamer.start();
            self.streamer.set_volume(s.volume);

            if !s.open_sent {
                fx.notices
                    .push(SpeakerNotice::SpeakerOpened(s.offsets.start));
                s.open_sent = true;
            }
        }
    }

    fn check_open_timeout(&self, s: &mut SpeakerState, fx: &mut Effects, now: Instant) {
        if !s.open {
            return;
        }
        if let Some(armed_at) = s.open_timer {
            let expired = now
                .checked_duration_since(armed_at)
                .map_or(false, |elapsed| elapsed >= self.config.open_speaker_timeout());
            if expired {
                fx.open_timed_out = Some(armed_at);
            }
        }
    }

    fn drop_half_of_queue(&self) {
        let frame = self.config.opus_frame_bytes;
        let frames = self.streamer.queued_bytes() / frame;
        let drop = frames / 2 * frame;
        if drop > 0 {
            debug!("🔇 Dropping {} queued speaker bytes", drop);
            self.streamer.discard(drop);
        }
    }
}
