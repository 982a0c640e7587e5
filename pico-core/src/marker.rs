//! Marker table.
//!
//! A marker is a named trigger counter gating image sends. Each gated send
//! consumes one trigger; at zero the marker blocks until the count is
//! reloaded, either locally or by the viewer through a marker-sync frame.
//!
//! The wire protocol addresses markers by slot index, so slots are never
//! removed or reused: deleting a marker only tombstones its slot.

use tracing::debug;

use crate::error::PicoError;
use crate::wire::{DEFAULT_MARKER_COLOR, MarkerRecord};

// ── Marker ───────────────────────────────────────────────────────

/// A named, indexed trigger counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    index: u32,
    name: String,
    trigger_count: u32,
    /// Count reported by the viewer and not yet committed (manual sync).
    pending: Option<u32>,
    color: u32,
    live: bool,
}

impl Marker {
    fn new(index: u32, name: String, trigger_count: u32, color: u32) -> Self {
        Self {
            index,
            name,
            trigger_count,
            pending: None,
            color,
            live: true,
        }
    }

    /// Slot index, `None` once deleted.
    pub fn index(&self) -> Option<u32> {
        self.live.then_some(self.index)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger_count(&self) -> u32 {
        self.trigger_count
    }

    pub fn pending_count(&self) -> Option<u32> {
        self.pending
    }

    pub fn color(&self) -> u32 {
        self.color
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Consume one trigger. No-op at zero.
    pub fn decrement(&mut self) -> u32 {
        self.trigger_count = self.trigger_count.saturating_sub(1);
        self.trigger_count
    }

    fn to_record(&self) -> MarkerRecord {
        MarkerRecord {
            index: self.index,
            use_count: self.trigger_count,
            color: self.color,
            name: self.name.clone(),
        }
    }
}

// ── SyncMode ─────────────────────────────────────────────────────

/// How incoming viewer updates reach the trigger counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Viewer counts overwrite local counts as they arrive.
    #[default]
    Auto,
    /// Viewer counts are staged until [`MarkerTable::synchronize`].
    Manual,
}

/// What happened to one incoming marker record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteUpdate {
    Applied,
    Staged,
    /// Index outside the table or tombstoned. The table never grows from
    /// peer data.
    Ignored,
}

// ── MarkerTable ──────────────────────────────────────────────────

/// Append-only collection of markers with tombstone deletion.
#[derive(Debug, Clone, Default)]
pub struct MarkerTable {
    slots: Vec<Marker>,
    mode: SyncMode,
}

impl MarkerTable {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            slots: Vec::new(),
            mode,
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SyncMode) {
        self.mode = mode;
    }

    /// Number of slots ever allocated, tombstones included.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of live markers.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|m| m.live).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a marker at the next slot.
    pub fn add(&mut self, name: &str, trigger_count: u32, color: u32) -> Result<u32, PicoError> {
        if self.position_by_name(name).is_some() {
            debug!(name, "marker name already in use");
            return Err(PicoError::DuplicateMarker(name.to_string()));
        }
        let index = u32::try_from(self.slots.len())
            .map_err(|_| PicoError::InvalidArgument("marker table is full"))?;
        self.slots
            .push(Marker::new(index, name.to_string(), trigger_count, color));
        Ok(index)
    }

    /// [`add`](Self::add) with the default display colour.
    pub fn add_default(&mut self, name: &str, trigger_count: u32) -> Result<u32, PicoError> {
        self.add(name, trigger_count, DEFAULT_MARKER_COLOR)
    }

    /// Live marker at `index`.
    pub fn get(&self, index: u32) -> Option<&Marker> {
        self.slots.get(index as usize).filter(|m| m.live)
    }

    fn get_mut(&mut self, index: u32) -> Option<&mut Marker> {
        self.slots.get_mut(index as usize).filter(|m| m.live)
    }

    /// Live marker called `name`.
    pub fn find(&self, name: &str) -> Option<&Marker> {
        self.position_by_name(name).map(|pos| &self.slots[pos])
    }

    fn position_by_name(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|m| m.live && m.name == name)
    }

    /// Remaining triggers of the live marker at `index`.
    pub fn use_count(&self, index: u32) -> Option<u32> {
        self.get(index).map(Marker::trigger_count)
    }

    /// Tombstone the marker at `index`. Returns `false` if not found.
    pub fn delete(&mut self, index: u32) -> bool {
        match self.get_mut(index) {
            Some(marker) => {
                marker.live = false;
                marker.pending = None;
                true
            }
            None => false,
        }
    }

    /// Tombstone the live marker called `name`.
    pub fn delete_by_name(&mut self, name: &str) -> bool {
        match self.position_by_name(name) {
            Some(pos) => self.delete(pos as u32),
            None => false,
        }
    }

    /// Tombstone every marker. Slot indices stay reserved.
    pub fn delete_all(&mut self) {
        for marker in &mut self.slots {
            marker.live = false;
            marker.pending = None;
        }
    }

    /// Zero the trigger count of the marker at `index`.
    pub fn reset(&mut self, index: u32) -> bool {
        match self.get_mut(index) {
            Some(marker) => {
                marker.trigger_count = 0;
                true
            }
            None => false,
        }
    }

    pub fn reset_by_name(&mut self, name: &str) -> bool {
        match self.position_by_name(name) {
            Some(pos) => self.reset(pos as u32),
            None => false,
        }
    }

    /// Check that the marker at `index` can fire.
    pub fn check_trigger(&self, index: u32) -> Result<(), PicoError> {
        match self.get(index) {
            None => Err(PicoError::MarkerNotFound(index)),
            Some(marker) if marker.trigger_count == 0 => Err(PicoError::MarkerExhausted(index)),
            Some(_) => Ok(()),
        }
    }

    /// Consume one trigger of the marker at `index`, returning what is left.
    pub fn take_trigger(&mut self, index: u32) -> Result<u32, PicoError> {
        self.check_trigger(index)?;
        match self.get_mut(index) {
            Some(marker) => Ok(marker.decrement()),
            None => Err(PicoError::MarkerNotFound(index)),
        }
    }

    /// Apply one record received from the viewer.
    pub fn apply_remote(&mut self, index: u32, use_count: u32) -> RemoteUpdate {
        let mode = self.mode;
        let Some(marker) = self.get_mut(index) else {
            return RemoteUpdate::Ignored;
        };
        match mode {
            SyncMode::Auto => {
                marker.trigger_count = use_count;
                marker.pending = None;
                RemoteUpdate::Applied
            }
            SyncMode::Manual => {
                marker.pending = Some(use_count);
                RemoteUpdate::Staged
            }
        }
    }

    /// Commit every staged viewer count. Returns how many were committed.
    pub fn synchronize(&mut self) -> usize {
        let mut committed = 0;
        for marker in self.slots.iter_mut().filter(|m| m.live) {
            if let Some(count) = marker.pending.take() {
                marker.trigger_count = count;
                committed += 1;
            }
        }
        committed
    }

    /// Wire records of all live markers, in slot order.
    pub fn records(&self) -> Vec<MarkerRecord> {
        self.slots
            .iter()
            .filter(|m| m.live)
            .map(Marker::to_record)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.slots.iter().filter(|m| m.live)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_sequential() {
        let mut table = MarkerTable::default();
        assert_eq!(table.add_default("shadow", 1).unwrap(), 0);
        assert_eq!(table.add("gbuffer", 2, 0xFF00_00FF).unwrap(), 1);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1).unwrap().color(), 0xFF00_00FF);
        assert_eq!(table.get(0).unwrap().color(), DEFAULT_MARKER_COLOR);
    }

    #[test]
    fn duplicate_name_leaves_table_unchanged() {
        let mut table = MarkerTable::default();
        table.add_default("shadow", 1).unwrap();
        let before = table.records();

        let err = table.add_default("shadow", 9).unwrap_err();
        assert!(matches!(err, PicoError::DuplicateMarker(_)));
        assert_eq!(table.records(), before);
        assert_eq!(table.slot_count(), 1);
    }

    #[test]
    fn deleted_name_can_be_reused_with_new_index() {
        let mut table = MarkerTable::default();
        table.add_default("shadow", 1).unwrap();
        assert!(table.delete_by_name("shadow"));
        assert_eq!(table.add_default("shadow", 4).unwrap(), 1);
        assert!(table.get(0).is_none());
        assert_eq!(table.use_count(1), Some(4));
    }

    #[test]
    fn delete_keeps_other_indices() {
        let mut table = MarkerTable::default();
        table.add_default("a", 1).unwrap();
        table.add_default("b", 2).unwrap();
        table.add_default("c", 3).unwrap();

        assert!(table.delete(1));
        assert!(table.get(1).is_none());
        assert_eq!(table.use_count(1), None);
        assert!(!table.delete(1));

        assert_eq!(table.find("a").unwrap().index(), Some(0));
        assert_eq!(table.find("c").unwrap().index(), Some(2));
        assert_eq!(table.add_default("d", 1).unwrap(), 3);
    }

    #[test]
    fn delete_all_reserves_slots() {
        let mut table = MarkerTable::default();
        table.add_default("a", 1).unwrap();
        table.add_default("b", 1).unwrap();
        table.delete_all();
        assert!(table.is_empty());
        assert!(table.records().is_empty());
        assert_eq!(table.add_default("a", 1).unwrap(), 2);
    }

    #[test]
    fn decrement_stops_at_zero() {
        let mut table = MarkerTable::default();
        let idx = table.add_default("once", 1).unwrap();

        assert_eq!(table.take_trigger(idx).unwrap(), 0);
        assert!(matches!(
            table.take_trigger(idx),
            Err(PicoError::MarkerExhausted(0))
        ));
        assert_eq!(table.use_count(idx), Some(0));
        assert!(matches!(
            table.take_trigger(7),
            Err(PicoError::MarkerNotFound(7))
        ));
    }

    #[test]
    fn reset_zeroes_count() {
        let mut table = MarkerTable::default();
        table.add_default("a", 5).unwrap();
        assert!(table.reset_by_name("a"));
        assert_eq!(table.use_count(0), Some(0));
        assert!(!table.reset(3));
    }

    #[test]
    fn auto_sync_overwrites_and_clears_pending() {
        let mut table = MarkerTable::new(SyncMode::Manual);
        table.add_default("a", 1).unwrap();
        assert_eq!(table.apply_remote(0, 3), RemoteUpdate::Staged);

        table.set_mode(SyncMode::Auto);
        assert_eq!(table.apply_remote(0, 8), RemoteUpdate::Applied);
        let marker = table.get(0).unwrap();
        assert_eq!(marker.trigger_count(), 8);
        assert_eq!(marker.pending_count(), None);
    }

    #[test]
    fn manual_sync_stages_until_commit() {
        let mut table = MarkerTable::new(SyncMode::Manual);
        table.add_default("a", 1).unwrap();
        table.add_default("b", 2).unwrap();

        assert_eq!(table.apply_remote(1, 10), RemoteUpdate::Staged);
        assert_eq!(table.use_count(1), Some(2));
        assert_eq!(table.get(1).unwrap().pending_count(), Some(10));

        assert_eq!(table.synchronize(), 1);
        assert_eq!(table.use_count(1), Some(10));
        assert_eq!(table.get(1).unwrap().pending_count(), None);
        assert_eq!(table.use_count(0), Some(1));

        assert_eq!(table.synchronize(), 0);
    }

    #[test]
    fn unknown_or_deleted_index_is_ignored() {
        let mut table = MarkerTable::default();
        table.add_default("a", 1).unwrap();
        assert_eq!(table.apply_remote(5, 3), RemoteUpdate::Ignored);
        assert_eq!(table.slot_count(), 1);

        table.delete(0);
        assert_eq!(table.apply_remote(0, 3), RemoteUpdate::Ignored);
    }

    #[test]
    fn records_skip_tombstones() {
        let mut table = MarkerTable::default();
        table.add_default("a", 1).unwrap();
        table.add("b", 2, 7).unwrap();
        table.delete(0);

        let records = table.records();
        assert_eq!(
            records,
            vec![MarkerRecord {
                index: 1,
                use_count: 2,
                color: 7,
                name: "b".into(),
            }]
        );
    }
}
