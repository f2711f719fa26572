use std::process::Command;
use std::sync::Arc;

use crate::services::event_bus::{Event, EventBus};
use crate::services::device_service::DeviceService;
use crate::services::screensaver_service::ScreenSaverService;
use crate::services::sensor_service::SensorService;

use super::{CONSUMER_STATUS_TOPIC, TelemetryService, Topics};

/// Collaborators inbound broker commands act on. Assembled once at startup
/// and attached to the telemetry service.
pub struct CommandContext {
    pub device: Arc<DeviceService>,
    pub bus: Arc<EventBus>,
    pub saver: Arc<ScreenSaverService>,
    pub sensors: Arc<SensorService>,
}

/// Routes one inbound broker message. Unknown topics and malformed payloads
/// are logged and ignored; the dispatch loop must never die on bad input.
pub(super) async fn dispatch(service: &Arc<TelemetryService>, topic: &str, payload: &[u8]) {
    if topic == CONSUMER_STATUS_TOPIC {
        if payload == b"online" {
            tracing::info!("consumer back online, republishing discovery");
            service.publish_status().await;
        }
        return;
    }

    let Some(ctx) = service.command_context() else {
        return;
    };
    let topics = service.topics().await;

    if topic == topics.update() {
        service.publish_status().await;
    } else if let Some(index) = parse_relay_command(&topics, topic) {
        let on = String::from_utf8_lossy(payload).contains("ON");
        if let Err(e) = ctx.device.write_relay(index, on) {
            tracing::error!("relay {} command failed: {}", index, e);
            return;
        }
        service.publish_relay(index, on).await;
    } else if topic == topics.sleep() {
        ctx.saver.start().await;
    } else if topic == topics.wake() {
        ctx.saver.stop().await;
    } else if topic == topics.refresh() {
        ctx.bus.publish(Event::SettingsChanged);
    } else if topic == topics.reboot() {
        handle_reboot(service);
    }
}

fn handle_reboot(service: &TelemetryService) {
    let uptime = service.uptime();
    let floor = service.min_uptime_for_reboot();

    if uptime < floor {
        let remaining = (floor - uptime).as_secs() + 1;
        tracing::warn!(
            "reboot rejected, please wait {} seconds before rebooting",
            remaining
        );
        return;
    }

    tracing::info!("reboot requested over broker");
    if let Err(e) = Command::new("reboot").spawn() {
        tracing::error!("error rebooting: {}", e);
    }
}

/// Matches `relay_command` (index 0) and `relay_command_<n>` topics.
fn parse_relay_command(topics: &Topics, topic: &str) -> Option<usize> {
    let base = topics.relay_command(0);
    if topic == base {
        return Some(0);
    }
    topic
        .strip_prefix(&base)?
        .strip_prefix('_')?
        .parse::<usize>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_relay_command_indexes() {
        let topics = Topics::new("lumipanel-ab12");

        assert_eq!(
            parse_relay_command(&topics, "lumipanel/lumipanel-ab12/relay_command"),
            Some(0)
        );
        assert_eq!(
            parse_relay_command(&topics, "lumipanel/lumipanel-ab12/relay_command_1"),
            Some(1)
        );
        assert_eq!(
            parse_relay_command(&topics, "lumipanel/lumipanel-ab12/relay_state"),
            None
        );
        assert_eq!(
            parse_relay_command(&topics, "lumipanel/lumipanel-ab12/relay_command_x"),
            None
        );
    }
}
