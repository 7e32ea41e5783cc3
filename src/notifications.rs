/// Desktop notifications for engine events
/// Currently only implements macOS notifications
use crate::events::EngineEvent;

#[cfg(target_os = "macos")]
use std::process::Command;

/// Title and body for events worth interrupting the user for
pub fn notification_for(event: &EngineEvent) -> Option<(String, String)> {
    match event {
        EngineEvent::InstanceActivated {
            title, notes, alert, ..
        } if *alert => {
            let body = if notes.is_empty() {
                title.clone()
            } else {
                format!("{} - {}", title, notes)
            };
            Some(("Daykeeper - Now".to_string(), body))
        }
        EngineEvent::TimeLow {
            title,
            remaining_secs,
            ..
        } => Some((
            "Daykeeper - Time Low".to_string(),
            format!("⏰ {} ({}s left)", title, remaining_secs),
        )),
        EngineEvent::Expired { title, .. } => Some((
            "Daykeeper - Missed".to_string(),
            format!("{} moved to catch-up", title),
        )),
        EngineEvent::BadgeEarned(badge) => Some((
            "Daykeeper - Badge Earned".to_string(),
            format!("{} day streak", badge.threshold),
        )),
        _ => None,
    }
}

/// Send a notification for an engine event, if it warrants one
pub fn notify_event(event: &EngineEvent) {
    if let Some((title, body)) = notification_for(event) {
        send(&title, &body);
    }
}

fn send(title: &str, body: &str) {
    #[cfg(target_os = "macos")]
    {
        let script = format!(
            r#"display notification "{}" with title "{}""#,
            body.replace('"', "\\\""),
            title.replace('"', "\\\"")
        );

        let _ = Command::new("osascript").arg("-e").arg(&script).output();
    }

    #[cfg(not(target_os = "macos"))]
    {
        // No-op on other platforms
        let _ = (title, body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_respects_alert_flag() {
        let event = EngineEvent::InstanceActivated {
            instance_id: "stretch_0700@2026-05-04".to_string(),
            title: "Stretch".to_string(),
            notes: "Mat by the window".to_string(),
            alert: false,
            remaining_secs: 600,
        };
        assert_eq!(notification_for(&event), None);

        let event = EngineEvent::InstanceActivated {
            instance_id: "stretch_0700@2026-05-04".to_string(),
            title: "Stretch".to_string(),
            notes: "Mat by the window".to_string(),
            alert: true,
            remaining_secs: 600,
        };
        let (_, body) = notification_for(&event).unwrap();
        assert_eq!(body, "Stretch - Mat by the window");
    }

    #[test]
    fn test_quiet_events() {
        let event = EngineEvent::TimerPaused {
            instance_id: "stretch_0700@2026-05-04".to_string(),
        };
        assert_eq!(notification_for(&event), None);
    }
}
