// Session state engine
//
// Owns the ordered slot collection and keeps it valid: channels are unique,
// a non-empty session has exactly one primary slot and exactly one slot
// holding audio, and the slot count never exceeds the capacity ceiling.
//
// Embed identity policy: add, remove and promote replace the identity of
// every surviving slot so the whole set of rendering surfaces is recreated
// together. Keeping an old surface while its grid area changes leaves a
// frozen frame behind. Moving the audio source only flips mute flags on
// live players and keeps every identity.

use super::{
    normalize_channel, EmbedIdentity, SessionError, SessionResult, Slot, SlotId, SlotList,
};

/// Ordered slot collection for one viewing context
#[derive(Debug, Clone)]
pub struct SessionState {
    slots: Vec<Slot>,
    capacity: usize,
}

/// Outcome of seeding a session from a saved channel list
#[derive(Debug, Default)]
pub struct HydrationReport {
    pub added: Vec<String>,
    pub skipped: Vec<(String, SessionError)>,
}

impl SessionState {
    /// Create an empty session limited to `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Snapshot of the current slots
    pub fn slots(&self) -> SlotList {
        SlotList::new(self.slots.clone())
    }

    /// Add a channel at the end of the session
    ///
    /// The first slot becomes primary and audio-bearing. Existing slots get
    /// fresh embed identities.
    pub fn add(&mut self, channel: &str) -> SessionResult<SlotList> {
        let channel = normalize_channel(channel);
        if channel.is_empty() {
            return Err(SessionError::invalid_channel(channel));
        }

        if self.slots.iter().any(|s| s.channel == channel) {
            return Err(SessionError::duplicate_channel(channel));
        }

        if self.slots.len() >= self.capacity {
            return Err(SessionError::capacity_exceeded(self.capacity));
        }

        self.regenerate_identities();

        let mut slot = Slot::new(channel);
        if self.slots.is_empty() {
            slot.is_primary = true;
            slot.has_audio = true;
        }
        log::debug!("Adding slot {} for channel {}", slot.id, slot.channel);
        self.slots.push(slot);

        Ok(self.slots())
    }

    /// Remove a slot
    ///
    /// A removed primary hands primary to the first remaining slot. A
    /// removed audio source hands audio to whichever slot is primary
    /// afterwards.
    pub fn remove(&mut self, slot_id: SlotId) -> SessionResult<SlotList> {
        let index = self.index_of(slot_id)?;
        let removed = self.slots.remove(index);
        log::debug!("Removed slot {} ({})", removed.id, removed.channel);

        if removed.is_primary {
            if let Some(first) = self.slots.first_mut() {
                first.is_primary = true;
            }
        }

        if removed.has_audio {
            for slot in &mut self.slots {
                slot.has_audio = slot.is_primary;
            }
        }

        self.regenerate_identities();
        Ok(self.slots())
    }

    /// Make a slot primary; it takes the audio with it
    pub fn promote_to_primary(&mut self, slot_id: SlotId) -> SessionResult<SlotList> {
        self.index_of(slot_id)?;

        for slot in &mut self.slots {
            let target = slot.id == slot_id;
            slot.is_primary = target;
            slot.has_audio = target;
        }
        log::debug!("Promoted slot {} to primary", slot_id);

        self.regenerate_identities();
        Ok(self.slots())
    }

    /// Move audio to a slot without touching primary or embed identities
    pub fn set_audio_source(&mut self, slot_id: SlotId) -> SessionResult<SlotList> {
        self.index_of(slot_id)?;

        for slot in &mut self.slots {
            slot.has_audio = slot.id == slot_id;
        }
        log::debug!("Audio source moved to slot {}", slot_id);

        Ok(self.slots())
    }

    /// Change the capacity ceiling
    ///
    /// Lowering it below the current count keeps every slot; only further
    /// additions are rejected.
    pub fn set_capacity(&mut self, capacity: usize) {
        if capacity < self.slots.len() {
            log::warn!(
                "Capacity lowered to {} with {} slots open; no further streams can be added",
                capacity,
                self.slots.len()
            );
        }
        self.capacity = capacity;
    }

    /// Seed the session from a channel list, skipping rejected channels
    pub fn hydrate<S: AsRef<str>>(&mut self, channels: &[S]) -> HydrationReport {
        let mut report = HydrationReport::default();
        for channel in channels {
            let channel = channel.as_ref();
            match self.add(channel) {
                Ok(_) => report.added.push(normalize_channel(channel)),
                Err(e) => {
                    log::warn!("Skipping channel {:?} while hydrating session: {}", channel, e);
                    report.skipped.push((channel.to_string(), e));
                }
            }
        }
        report
    }

    fn index_of(&self, slot_id: SlotId) -> SessionResult<usize> {
        self.slots
            .iter()
            .position(|s| s.id == slot_id)
            .ok_or_else(|| SessionError::slot_not_found(slot_id))
    }

    fn regenerate_identities(&mut self) {
        for slot in &mut self.slots {
            slot.embed_identity = EmbedIdentity::generate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn assert_invariants(state: &SessionState) {
        let slots = state.slots();
        let mut channels = slots.channels();
        channels.sort();
        channels.dedup();
        assert_eq!(channels.len(), slots.len(), "channels must be unique");
        assert!(slots.len() <= state.capacity());

        let primaries = slots.iter().filter(|s| s.is_primary).count();
        let audio = slots.iter().filter(|s| s.has_audio).count();
        if slots.is_empty() {
            assert_eq!(primaries, 0);
            assert_eq!(audio, 0);
        } else {
            assert_eq!(primaries, 1);
            assert_eq!(audio, 1);
        }
    }

    fn id_of(state: &SessionState, channel: &str) -> SlotId {
        state.slots().find_by_channel(channel).unwrap().id
    }

    #[test]
    fn test_first_slot_is_primary_with_audio() {
        let mut state = SessionState::new(3);
        let slots = state.add("Alice").unwrap();

        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].channel, "alice");
        assert!(slots[0].is_primary);
        assert!(slots[0].has_audio);
    }

    #[test]
    fn test_add_rejects_duplicate_case_insensitive() {
        let mut state = SessionState::new(3);
        state.add("alice").unwrap();

        let before = state.slots();
        let result = state.add("  ALICE ");
        assert!(matches!(result, Err(SessionError::DuplicateChannel(ref c)) if c == "alice"));
        assert_eq!(state.slots(), before);
    }

    #[test]
    fn test_add_rejects_empty_channel() {
        let mut state = SessionState::new(3);
        assert!(matches!(state.add("   "), Err(SessionError::InvalidChannel(_))));
        assert!(state.is_empty());
    }

    #[test]
    fn test_capacity_ceiling() {
        let mut state = SessionState::new(3);
        state.add("alice").unwrap();
        state.add("bob").unwrap();
        state.add("carol").unwrap();

        let before = state.slots();
        let result = state.add("dave");
        assert!(matches!(result, Err(SessionError::CapacityExceeded { capacity: 3 })));
        assert_eq!(state.slots(), before);
        assert_eq!(state.slots().channels(), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_add_regenerates_existing_identities() {
        let mut state = SessionState::new(3);
        let first = state.add("alice").unwrap();
        let second = state.add("bob").unwrap();

        assert_eq!(first[0].id, second[0].id);
        assert_ne!(first[0].embed_identity, second[0].embed_identity);
        assert!(second[0].is_primary && second[0].has_audio);
        assert!(!second[1].is_primary && !second[1].has_audio);
    }

    #[test]
    fn test_remove_non_primary_keeps_primary() {
        let mut state = SessionState::new(3);
        state.add("alice").unwrap();
        state.add("bob").unwrap();
        state.add("carol").unwrap();

        let slots = state.remove(id_of(&state, "bob")).unwrap();
        assert_eq!(slots.channels(), vec!["alice", "carol"]);
        assert_eq!(slots.primary().unwrap().channel, "alice");
        assert_eq!(slots.audio_source().unwrap().channel, "alice");

        let slots = state.remove(id_of(&state, "alice")).unwrap();
        assert_eq!(slots.len(), 1);
        assert!(slots[0].is_primary && slots[0].has_audio);
        assert_eq!(slots[0].channel, "carol");
    }

    #[test]
    fn test_remove_primary_promotes_next_in_order() {
        let mut state = SessionState::new(9);
        for channel in ["a", "b", "c", "d"] {
            state.add(channel).unwrap();
        }

        let slots = state.remove(id_of(&state, "a")).unwrap();
        assert_eq!(slots.primary().unwrap().channel, "b");
        assert_eq!(slots.audio_source().unwrap().channel, "b");
        assert_invariants(&state);
    }

    #[test]
    fn test_remove_audio_source_returns_audio_to_primary() {
        let mut state = SessionState::new(9);
        for channel in ["a", "b", "c"] {
            state.add(channel).unwrap();
        }
        state.set_audio_source(id_of(&state, "c")).unwrap();

        let slots = state.remove(id_of(&state, "c")).unwrap();
        assert_eq!(slots.audio_source().unwrap().channel, "a");
    }

    #[test]
    fn test_remove_last_slot_empties_session() {
        let mut state = SessionState::new(3);
        state.add("alice").unwrap();
        let slots = state.remove(id_of(&state, "alice")).unwrap();
        assert!(slots.is_empty());
        assert!(slots.audio_source().is_none());
    }

    #[test]
    fn test_unknown_slot_is_rejected_everywhere() {
        let mut state = SessionState::new(3);
        state.add("alice").unwrap();
        let before = state.slots();
        let stale = Uuid::new_v4();

        assert!(matches!(state.remove(stale), Err(SessionError::SlotNotFound(_))));
        assert!(matches!(state.promote_to_primary(stale), Err(SessionError::SlotNotFound(_))));
        assert!(matches!(state.set_audio_source(stale), Err(SessionError::SlotNotFound(_))));
        assert_eq!(state.slots(), before);
    }

    #[test]
    fn test_promotion_moves_primary_and_audio_together() {
        let mut state = SessionState::new(3);
        state.add("alice").unwrap();
        state.add("bob").unwrap();
        let before = state.slots();

        let bob = id_of(&state, "bob");
        let slots = state.promote_to_primary(bob).unwrap();
        let promoted = slots.find(bob).unwrap();
        assert!(promoted.is_primary && promoted.has_audio);
        assert_invariants(&state);

        // order is unchanged, every surface is replaced
        assert_eq!(slots.channels(), before.channels());
        for (old, new) in before.iter().zip(slots.iter()) {
            assert_eq!(old.id, new.id);
            assert_ne!(old.embed_identity, new.embed_identity);
        }
    }

    #[test]
    fn test_set_audio_source_preserves_surfaces() {
        let mut state = SessionState::new(3);
        state.add("alice").unwrap();
        state.add("bob").unwrap();
        let before = state.slots();

        let slots = state.set_audio_source(id_of(&state, "bob")).unwrap();
        assert_eq!(slots.primary().unwrap().channel, "alice");
        assert_eq!(slots.audio_source().unwrap().channel, "bob");
        for (old, new) in before.iter().zip(slots.iter()) {
            assert_eq!(old.embed_identity, new.embed_identity);
        }
    }

    #[test]
    fn test_lowering_capacity_keeps_slots() {
        let mut state = SessionState::new(9);
        for channel in ["a", "b", "c", "d"] {
            state.add(channel).unwrap();
        }
        state.set_capacity(3);
        assert_eq!(state.len(), 4);
        assert!(matches!(state.add("e"), Err(SessionError::CapacityExceeded { .. })));
    }

    #[test]
    fn test_hydrate_reports_skipped_channels() {
        let mut state = SessionState::new(3);
        let report = state.hydrate(&["alice", "Alice", "bob", "carol", "dave"]);

        assert_eq!(report.added, vec!["alice", "bob", "carol"]);
        assert_eq!(report.skipped.len(), 2);
        assert!(matches!(report.skipped[0].1, SessionError::DuplicateChannel(_)));
        assert!(matches!(report.skipped[1].1, SessionError::CapacityExceeded { .. }));
        assert_invariants(&state);
    }

    #[test]
    fn test_invariants_hold_over_mixed_sequence() {
        let mut state = SessionState::new(9);
        let channels = ["a", "b", "c", "d", "e", "f", "g"];
        for (i, channel) in channels.iter().enumerate() {
            state.add(channel).unwrap();
            assert_invariants(&state);

            let slots = state.slots();
            let target = slots[i % slots.len()].id;
            if i % 2 == 0 {
                state.promote_to_primary(target).unwrap();
            } else {
                state.set_audio_source(target).unwrap();
            }
            assert_invariants(&state);
        }

        while let Some(slot) = state.slots().get(1).cloned() {
            state.remove(slot.id).unwrap();
            assert_invariants(&state);
        }
        let last = state.slots()[0].id;
        state.remove(last).unwrap();
        assert_invariants(&state);
    }
}
