use log::debug;

/// Capacity of the marker table
pub const MAX_ECHO_MARKERS: usize = 3;

/// Playback position the service wants to hear about once reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EchoMarker {
    pub id: u32,
    pub target_offset: u64,
    pub pending: bool,
}

/// Fixed-size marker table. Pending markers are kept in front, ascending by target offset,
/// so the reached-offset scan can stop at the first marker still ahead of playback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoMarkers {
    slots: [EchoMarker; MAX_ECHO_MARKERS],
}

impl EchoMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a marker. When every slot is pending the last slot is overwritten.
    pub fn insert(&mut self, id: u32, target_offset: u64) {
        let index = self
            .slots
            .iter()
            .position(|marker| !marker.pending)
            .unwrap_or(MAX_ECHO_MARKERS - 1);

        if self.slots[index].pending {
            debug!(
                "🔖 Marker table full, replacing marker {} at {}",
                self.slots[index].id, self.slots[index].target_offset
            );
        }

        self.slots[index] = EchoMarker {
            id,
            target_offset,
            pending: true,
        };
        self.slots
            .sort_by_key(|marker| (!marker.pending, marker.target_offset));
    }

    /// Clear and return, in ascending order, every pending marker at or behind `progress`
    pub fn take_reached(&mut self, progress: u64) -> Vec<u32> {
        let mut reached = Vec::new();
        for marker in self.slots.iter_mut() {
            if !marker.pending || marker.target_offset > progress {
                break;
            }
            marker.pending = false;
            reached.push(marker.id);
        }
        if !reached.is_empty() {
            self.slots
                .sort_by_key(|marker| (!marker.pending, marker.target_offset));
        }
        reached
    }

    /// Target offsets of the pending markers, in scan order
    pub fn pending_targets(&self) -> Vec<u64> {
        self.slots
            .iter()
            .filter(|marker| marker.pending)
            .map(|marker| marker.target_offset)
            .collect()
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
    }
}
