//! Tests for the demo call

#[cfg(test)]
mod tests {
    use super::super::demo::*;
    use classcall_core::prelude::*;
    use classcall_core::{AcquisitionNotice, MediaDevices};
    use std::time::Duration;

    fn options() -> DemoOptions {
        DemoOptions {
            caller: "teacher-1".to_string(),
            callee: "student-1".to_string(),
            caller_video: true,
            callee_video: true,
            camera_busy: false,
            decline: false,
            hold: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_devices_without_camera() {
        let devices = devices_for(false, false);
        let all = devices.enumerate_devices().await.unwrap();
        assert!(all.iter().all(|d| d.kind != DeviceKind::VideoInput));
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_describe_events() {
        let call_id = CallId::new();
        assert_eq!(
            describe(&CallEvent::CallEnded {
                call_id,
                reason: EndReason::Declined,
            }),
            "📞 Call ended (declined)"
        );
        assert!(describe(&CallEvent::IncomingCall {
            call_id,
            caller: ParticipantId::new("teacher-1").unwrap(),
        })
        .contains("teacher-1"));
    }

    #[tokio::test]
    async fn test_demo_connects_and_hangs_up() {
        let outcome = run_demo(&CallConfig::default(), &options()).await.unwrap();
        assert!(outcome.connected);
        assert!(!outcome.caller_audio_only);
        assert_eq!(outcome.caller_state, Some(CallState::Ended));
        assert_eq!(outcome.callee_state, Some(CallState::Ended));
    }

    #[tokio::test]
    async fn test_demo_busy_camera_goes_audio_only() {
        let outcome = run_demo(
            &CallConfig::default(),
            &DemoOptions {
                camera_busy: true,
                ..options()
            },
        )
        .await
        .unwrap();
        assert!(outcome.connected);
        assert!(outcome.caller_audio_only);
        assert!(outcome.callee_audio_only);
        assert!(outcome.caller_notices.contains(&AcquisitionNotice::CameraBusy));
    }

    #[tokio::test]
    async fn test_demo_decline() {
        let outcome = run_demo(
            &CallConfig::default(),
            &DemoOptions {
                decline: true,
                ..options()
            },
        )
        .await
        .unwrap();
        assert!(!outcome.connected);
        assert_eq!(outcome.caller_state, Some(CallState::Ended));
        assert_eq!(outcome.callee_state, Some(CallState::Idle));
    }

    #[tokio::test]
    async fn test_demo_rejects_self_call() {
        let result = run_demo(
            &CallConfig::default(),
            &DemoOptions {
                callee: "teacher-1".to_string(),
                ..options()
            },
        )
        .await;
        assert!(result.is_err());
    }
}
