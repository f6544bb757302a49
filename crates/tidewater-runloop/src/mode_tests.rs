    use super::*;

    #[test]
    fn test_mode_display() {
        assert_eq!(RunLoopMode::Default.to_string(), "default");
        assert_eq!(RunLoopMode::EventTracking.to_string(), "event_tracking");
        assert_eq!(
            RunLoopMode::Custom("reply-wait".to_string()).to_string(),
            "reply-wait"
        );
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!(RunLoopMode::from("default"), RunLoopMode::Default);
        assert_eq!(RunLoopMode::from("modal_panel"), RunLoopMode::ModalPanel);
        assert_eq!(
            RunLoopMode::from("connection_reply"),
            RunLoopMode::ConnectionReply
        );
        assert_eq!(
            RunLoopMode::from("drag"),
            RunLoopMode::Custom("drag".to_string())
        );
    }

    #[test]
    fn test_mode_display_parses_back() {
        for mode in [
            RunLoopMode::Default,
            RunLoopMode::EventTracking,
            RunLoopMode::ModalPanel,
            RunLoopMode::ConnectionReply,
            RunLoopMode::Custom("x".to_string()),
        ] {
            assert_eq!(RunLoopMode::from(mode.to_string()), mode);
        }
    }

    #[test]
    fn test_mode_default() {
        let mode: RunLoopMode = Default::default();
        assert_eq!(mode, RunLoopMode::Default);
    }

    #[test]
    fn test_state_from_u8() {
        assert_eq!(RunLoopState::from(0), RunLoopState::Created);
        assert_eq!(RunLoopState::from(1), RunLoopState::Running);
        assert_eq!(RunLoopState::from(2), RunLoopState::Waiting);
        assert_eq!(RunLoopState::from(3), RunLoopState::Stopping);
        assert_eq!(RunLoopState::from(4), RunLoopState::Stopped);
        assert_eq!(RunLoopState::from(99), RunLoopState::Created);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(RunLoopState::Running.to_string(), "running");
        assert_eq!(ContextState::Firing.to_string(), "firing");
        assert_eq!(ContextState::Completed.to_string(), "completed");
    }
