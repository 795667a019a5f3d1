//! Unit tests for the transport module

#[cfg(test)]
mod tests {
    use crate::transport::SessionSlots;
    use crate::voice_queue::VoiceQueue;
    use std::sync::{Arc, Mutex};

    type Queue = Mutex<VoiceQueue>;

    #[test]
    fn test_first_join_creates_session() {
        let slots: SessionSlots<Queue> = SessionSlots::new();

        let (session, created) = slots.get_or_insert_with(1, || Mutex::new(VoiceQueue::new()));

        assert!(created);
        assert!(Arc::ptr_eq(&session, &slots.get(1).unwrap()));
    }

    #[test]
    fn test_rejoin_keeps_in_flight_session() {
        let slots: SessionSlots<Queue> = SessionSlots::new();
        let (playing, _) = slots.get_or_insert_with(1, || Mutex::new(VoiceQueue::new()));

        // A playback holds on to the session and keeps sending to it
        playing.lock().unwrap().push_samples(vec![(1, 1); 10]);

        let (rejoined, created) = slots.get_or_insert_with(1, || {
            panic!("rejoining must not replace the guild's session")
        });

        assert!(!created);
        assert!(Arc::ptr_eq(&playing, &rejoined));

        playing.lock().unwrap().push_marker("data/yt_full.a.mp3");
        let current = slots.get(1).unwrap();
        assert_eq!(current.lock().unwrap().tracks_remaining(), 1);
        assert_eq!(current.lock().unwrap().queued_samples(), 10);
    }

    #[test]
    fn test_guilds_have_separate_sessions() {
        let slots: SessionSlots<Queue> = SessionSlots::new();

        let (a, _) = slots.get_or_insert_with(1, || Mutex::new(VoiceQueue::new()));
        let (b, created) = slots.get_or_insert_with(2, || Mutex::new(VoiceQueue::new()));

        assert!(created);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_remove_then_join_creates_fresh_session() {
        let slots: SessionSlots<Queue> = SessionSlots::new();
        let (old, _) = slots.get_or_insert_with(1, || Mutex::new(VoiceQueue::new()));

        let removed = slots.remove(1).unwrap();
        assert!(Arc::ptr_eq(&old, &removed));
        assert!(slots.get(1).is_none());
        assert!(slots.remove(1).is_none());

        let (fresh, created) = slots.get_or_insert_with(1, || Mutex::new(VoiceQueue::new()));
        assert!(created);
        assert!(!Arc::ptr_eq(&old, &fresh));
    }
}
