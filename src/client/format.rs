//! Output formatting for CLI client commands.
//!
//! `initial` prints the bare URL (or nothing) to stdout so it can be
//! captured by scripts; everything else is human-readable.

use crate::ipc::protocol::{Delivery, RelayStatus};

pub fn print_delivery(url: &str, delivery: Delivery) {
    println!("{}", describe_delivery(url, delivery));
}

fn describe_delivery(url: &str, delivery: Delivery) -> String {
    match delivery {
        Delivery::Ignored => "Empty link ignored".to_string(),
        Delivery::Emitted => format!("Delivered {url} to listener"),
        Delivery::Buffered => format!("Buffered {url} until the runtime drains it"),
        Delivery::Replaced => {
            format!("Buffered {url} (replaced an undelivered link)")
        }
    }
}

/// Print the drained URL, or nothing if there was none.
pub fn print_initial(url: Option<&str>) {
    if let Some(url) = url {
        println!("{url}");
    }
}

pub fn print_status(status: &RelayStatus) {
    for line in status_lines(status) {
        println!("{line}");
    }
}

fn status_lines(status: &RelayStatus) -> Vec<String> {
    let generation = status
        .generation
        .map_or_else(|| "none".to_string(), |g| g.to_string());
    vec![
        format!("Module:     {}", status.module),
        format!("Relay:      {generation}"),
        format!(
            "Listener:   {}",
            if status.listener_attached {
                "attached"
            } else {
                "detached"
            }
        ),
        format!("Pending:    {}", status.pending.as_deref().unwrap_or("-")),
        format!("Launch:     {}", status.launch.as_deref().unwrap_or("-")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_descriptions() {
        assert_eq!(
            describe_delivery("app://x", Delivery::Emitted),
            "Delivered app://x to listener"
        );
        assert!(describe_delivery("app://x", Delivery::Replaced).contains("replaced"));
        assert_eq!(describe_delivery("", Delivery::Ignored), "Empty link ignored");
    }

    #[test]
    fn status_lines_show_placeholders() {
        let lines = status_lines(&RelayStatus {
            module: "RowtDeepLink".into(),
            generation: None,
            pending: None,
            launch: None,
            listener_attached: false,
        });
        assert_eq!(lines[1], "Relay:      none");
        assert_eq!(lines[2], "Listener:   detached");
        assert_eq!(lines[3], "Pending:    -");
    }

    #[test]
    fn status_lines_show_values() {
        let lines = status_lines(&RelayStatus {
            module: "RowtDeepLink".into(),
            generation: Some(3),
            pending: Some("app://p".into()),
            launch: Some("app://l".into()),
            listener_attached: true,
        });
        assert_eq!(lines[0], "Module:     RowtDeepLink");
        assert_eq!(lines[1], "Relay:      3");
        assert_eq!(lines[2], "Listener:   attached");
        assert_eq!(lines[3], "Pending:    app://p");
        assert_eq!(lines[4], "Launch:     app://l");
    }
}
