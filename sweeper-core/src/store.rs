//! # Spectrum Store Module
//!
//! Holds the measurement tracks. Each track is an array of per-bucket levels
//! written by exactly one producer at a time (the input callback or the sweep
//! driver) and read by the presentation layer. Buckets are individual atomics,
//! so a reader sees either the old or the new value of a slot, never a torn one.
//!
//! Track selection and visibility are control-side state behind a mutex; the
//! index of the current track is mirrored into an atomic for the callback.

use atomic_float::AtomicF32;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::frequency_map::FrequencyMap;

/// One measurement buffer.
#[derive(Debug)]
pub struct Track {
    levels: Box<[AtomicF32]>,
}

impl Track {
    fn new(bucket_count: usize, floor_db: f32) -> Self {
        Self {
            levels: (0..bucket_count).map(|_| AtomicF32::new(floor_db)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level(&self, bucket: usize) -> Option<f32> {
        self.levels.get(bucket).map(|l| l.load(Ordering::Relaxed))
    }

    /// Copy of every bucket, in bucket order.
    pub fn levels(&self) -> Vec<f32> {
        self.levels.iter().map(|l| l.load(Ordering::Relaxed)).collect()
    }

    fn fill(&self, db: f32) {
        for level in self.levels.iter() {
            level.store(db, Ordering::Relaxed);
        }
    }
}

#[derive(Debug)]
struct Selection {
    current: usize,
    visible: BTreeSet<usize>,
}

/// The set of tracks plus selection state.
#[derive(Debug)]
pub struct SpectrumStore {
    tracks: Vec<Track>,
    selection: Mutex<Selection>,
    current: AtomicUsize,
    floor_db: f32,
    ceiling_db: f32,
    modified: AtomicBool,
}

impl SpectrumStore {
    /// Creates `track_count` tracks of `bucket_count` buckets at `floor_db`.
    /// Track 0 starts current and visible.
    pub fn new(track_count: usize, bucket_count: usize, floor_db: f32, ceiling_db: f32) -> Self {
        Self {
            tracks: (0..track_count).map(|_| Track::new(bucket_count, floor_db)).collect(),
            selection: Mutex::new(Selection {
                current: 0,
                visible: BTreeSet::from([0]),
            }),
            current: AtomicUsize::new(0),
            floor_db,
            ceiling_db,
            modified: AtomicBool::new(true),
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, track: usize) -> Option<&Track> {
        self.tracks.get(track)
    }

    pub fn floor_db(&self) -> f32 {
        self.floor_db
    }

    /// Overwrites one bucket. Levels are clamped to the floor/ceiling range.
    ///
    /// Out-of-range indices and NaN levels are dropped; returns whether a
    /// value was written. Safe to call from the audio callback.
    pub fn write_level(&self, track: usize, bucket: usize, db: f32) -> bool {
        if db.is_nan() {
            return false;
        }
        match self.tracks.get(track).and_then(|t| t.levels.get(bucket)) {
            Some(slot) => {
                slot.store(db.clamp(self.floor_db, self.ceiling_db), Ordering::Relaxed);
                self.modified.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// [`SpectrumStore::write_level`] into the current track.
    pub fn write_current(&self, bucket: usize, db: f32) -> bool {
        self.write_level(self.current.load(Ordering::Acquire), bucket, db)
    }

    /// Selects a track.
    ///
    /// Without `extend` the visible set collapses to `{track}`. With `extend`
    /// the track's visibility is toggled; hiding the last visible track brings
    /// back track 0. The current track is always a visible one.
    pub fn select_track(&self, track: usize, extend: bool) -> bool {
        if track >= self.tracks.len() {
            return false;
        }
        let mut selection = self.selection.lock();
        if !extend {
            selection.visible.clear();
            selection.visible.insert(track);
            selection.current = track;
        } else if selection.visible.remove(&track) {
            if selection.visible.is_empty() {
                selection.visible.insert(0);
            }
            if !selection.visible.contains(&selection.current) {
                selection.current = selection.visible.iter().next().copied().unwrap_or(0);
            }
        } else {
            selection.visible.insert(track);
            selection.current = track;
        }
        self.current.store(selection.current, Ordering::Release);
        self.modified.store(true, Ordering::Release);
        true
    }

    /// Fills a track with the floor level.
    pub fn reset_track(&self, track: usize) -> bool {
        match self.tracks.get(track) {
            Some(t) => {
                t.fill(self.floor_db);
                self.modified.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn current_track(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Visible track indices in ascending order.
    pub fn visible_tracks(&self) -> Vec<usize> {
        self.selection.lock().visible.iter().copied().collect()
    }

    pub fn is_visible(&self, track: usize) -> bool {
        self.selection.lock().visible.contains(&track)
    }

    pub fn track_levels(&self, track: usize) -> Option<Vec<f32>> {
        self.tracks.get(track).map(Track::levels)
    }

    pub fn level(&self, track: usize, bucket: usize) -> Option<f32> {
        self.tracks.get(track).and_then(|t| t.level(bucket))
    }

    /// Returns and clears the "something changed since last redraw" flag.
    pub fn take_modified(&self) -> bool {
        self.modified.swap(false, Ordering::AcqRel)
    }

    /// Lazy (frequency, level) sequence of a track in bucket order.
    ///
    /// The returned iterator is `Clone`; clone it before consuming to walk the
    /// track again, or call [`TrackExport::restart`].
    pub fn export_track<'a>(&'a self, track: usize, map: &FrequencyMap) -> Option<TrackExport<'a>> {
        self.tracks.get(track).map(|t| TrackExport {
            levels: &t.levels,
            map: *map,
            next: 0,
        })
    }
}

/// Iterator over `(frequency_hz, level_db)` of one track.
#[derive(Debug, Clone)]
pub struct TrackExport<'a> {
    levels: &'a [AtomicF32],
    map: FrequencyMap,
    next: usize,
}

impl TrackExport<'_> {
    pub fn restart(&mut self) {
        self.next = 0;
    }
}

impl Iterator for TrackExport<'_> {
    type Item = (f64, f32);

    fn next(&mut self) -> Option<Self::Item> {
        let level = self.levels.get(self.next)?.load(Ordering::Relaxed);
        let hz = self.map.bucket_to_hz(self.next);
        self.next += 1;
        Some((hz, level))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.levels.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TrackExport<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn store() -> SpectrumStore {
        SpectrumStore::new(8, 256, -90.0, 0.0)
    }

    fn assert_invariant(store: &SpectrumStore) {
        let visible = store.visible_tracks();
        assert!(!visible.is_empty());
        assert!(visible.contains(&store.current_track()));
    }

    #[test]
    fn tracks_start_at_floor() {
        let store = store();
        assert!(store.track_levels(3).unwrap().iter().all(|&l| l == -90.0));
        assert_eq!(store.visible_tracks(), vec![0]);
        assert_eq!(store.current_track(), 0);
    }

    #[test]
    fn writes_are_bounds_checked_and_clamped() {
        let store = store();
        assert!(store.write_level(1, 10, -42.5));
        assert_eq!(store.level(1, 10), Some(-42.5));
        assert!(!store.write_level(1, 256, -10.0));
        assert!(!store.write_level(8, 0, -10.0));
        assert!(!store.write_level(0, 0, f32::NAN));

        store.write_level(0, 0, -130.0);
        assert_eq!(store.level(0, 0), Some(-90.0));
        store.write_level(0, 1, 6.0);
        assert_eq!(store.level(0, 1), Some(0.0));
    }

    #[test]
    fn reset_restores_floor() {
        let store = store();
        store.write_level(2, 5, -3.0);
        assert!(store.reset_track(2));
        assert_eq!(store.level(2, 5), Some(-90.0));
        assert!(!store.reset_track(99));
    }

    #[test]
    fn select_without_extend_collapses_visibility() {
        let store = store();
        store.select_track(3, true);
        store.select_track(5, false);
        assert_eq!(store.visible_tracks(), vec![5]);
        assert_eq!(store.current_track(), 5);
    }

    #[test]
    fn extend_toggles_membership() {
        let store = store();
        store.select_track(2, true);
        store.select_track(4, true);
        assert_eq!(store.visible_tracks(), vec![0, 2, 4]);
        assert_eq!(store.current_track(), 4);

        store.select_track(4, true);
        assert_eq!(store.visible_tracks(), vec![0, 2]);
        assert_eq!(store.current_track(), 0);
        assert_invariant(&store);
    }

    #[test]
    fn hiding_last_track_repopulates_track_zero() {
        let store = store();
        store.select_track(6, false);
        store.select_track(6, true);
        assert_eq!(store.visible_tracks(), vec![0]);
        assert_eq!(store.current_track(), 0);
    }

    #[test]
    fn invariant_holds_for_arbitrary_sequences() {
        let store = store();
        // deterministic pseudo-random walk over (track, extend)
        let mut seed: u32 = 12345;
        for _ in 0..2000 {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let track = (seed >> 16) as usize % 9;
            let extend = (seed >> 8) & 1 == 1;
            store.select_track(track, extend);
            assert_invariant(&store);
        }
    }

    #[test]
    fn current_track_receives_callback_writes() {
        let store = store();
        store.select_track(3, false);
        assert!(store.write_current(7, -12.0));
        assert_eq!(store.level(3, 7), Some(-12.0));
        assert_eq!(store.level(0, 7), Some(-90.0));
    }

    #[test]
    fn export_is_ordered_and_restartable() {
        let store = store();
        let map = FrequencyMap::new(&EngineConfig::default());
        store.write_level(0, 0, -33.0);

        let mut export = store.export_track(0, &map).unwrap();
        assert_eq!(export.len(), 256);
        let rows: Vec<_> = export.clone().collect();
        assert_eq!(rows.len(), 256);
        assert_eq!(rows[0].1, -33.0);
        assert!(rows.windows(2).all(|w| w[0].0 < w[1].0));

        export.by_ref().take(10).for_each(drop);
        export.restart();
        assert_eq!(export.next(), Some(rows[0]));
        assert!(store.export_track(8, &map).is_none());
    }

    #[test]
    fn modified_flag_tracks_writes() {
        let store = store();
        assert!(store.take_modified());
        assert!(!store.take_modified());
        store.write_level(0, 3, -20.0);
        assert!(store.take_modified());
    }
}
