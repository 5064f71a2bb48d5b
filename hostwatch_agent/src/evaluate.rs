//! Threshold evaluation: one rendered line per metric category.
//!
//! Pure logic over a `MetricsSnapshot`. Breaching values are wrapped in
//! `*...*` and carry an `(exceeds N)` suffix so the rendered text reads the
//! same in the alert log and in the notification body.

use serde::Serialize;

use crate::types::{MetricsSnapshot, Reading};

/// Alert limits. A value breaches only when strictly greater than its limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub cpu_load_percent: f64,
    pub cpu_temp_c: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub gpu_temp_c: f64,
    pub container_memory_percent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_load_percent: 80.0,
            cpu_temp_c: 85.0,
            memory_percent: 80.0,
            disk_percent: 90.0,
            gpu_temp_c: 75.0,
            container_memory_percent: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCategory {
    Cpu,
    CpuTemp,
    Memory,
    Disk,
    GpuTemp,
    TopProcesses,
    Containers,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRow {
    pub text: String,
    pub breaching: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertLine {
    pub category: AlertCategory,
    pub text: String,
    pub breaching: bool,
    // item rows of a block line (top processes, containers); empty otherwise
    pub rows: Vec<AlertRow>,
}

impl AlertLine {
    fn metric(category: AlertCategory, text: String, breaching: bool) -> Self {
        Self {
            category,
            text,
            breaching,
            rows: Vec::new(),
        }
    }

    fn block(category: AlertCategory, header: &str, rows: Vec<AlertRow>) -> Self {
        let mut text = String::from(header);
        for row in &rows {
            text.push('\n');
            text.push_str(&row.text);
        }
        Self {
            category,
            text,
            breaching: false,
            rows,
        }
    }

    /// True when the line itself or any of its rows breaches.
    pub fn has_breach(&self) -> bool {
        self.breaching || self.rows.iter().any(|r| r.breaching)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub lines: Vec<AlertLine>,
    pub any_breach: bool,
}

impl Evaluation {
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|l| l.text.as_str())
    }

    pub fn breaching_categories(&self) -> Vec<AlertCategory> {
        self.lines
            .iter()
            .filter(|l| l.has_breach())
            .map(|l| l.category)
            .collect()
    }
}

pub fn evaluate(snap: &MetricsSnapshot, limits: &Thresholds) -> Evaluation {
    let mut lines = Vec::with_capacity(7);

    lines.push(percent_line(
        AlertCategory::Cpu,
        "CPU Usage",
        snap.cpu_load_percent,
        limits.cpu_load_percent,
    ));
    // Absent sensors produce no line at all, so they can never look like a breach.
    if let Reading::Present(t) = snap.cpu_temp_c {
        lines.push(temp_line(
            AlertCategory::CpuTemp,
            "CPU Temp",
            t,
            limits.cpu_temp_c,
        ));
    }
    lines.push(percent_line(
        AlertCategory::Memory,
        "Memory",
        snap.memory_used_percent,
        limits.memory_percent,
    ));
    lines.push(percent_line(
        AlertCategory::Disk,
        "Disk",
        snap.disk_used_percent,
        limits.disk_percent,
    ));
    if let Reading::Present(t) = snap.gpu_temp_c {
        lines.push(temp_line(
            AlertCategory::GpuTemp,
            "GPU Temp",
            t,
            limits.gpu_temp_c,
        ));
    }

    let procs = snap
        .top_processes_by_memory
        .iter()
        .map(|p| AlertRow {
            text: format!("{}: {:.1} MB", p.name, p.memory_mb),
            breaching: false,
        })
        .collect();
    lines.push(AlertLine::block(
        AlertCategory::TopProcesses,
        "Top 5 Memory Processes:",
        procs,
    ));

    let mut containers: Vec<AlertRow> = snap
        .containers
        .iter()
        .map(|c| {
            let breaching = c.memory_percent > limits.container_memory_percent;
            let text = if breaching {
                format!(
                    "{}: CPU {:.2}%, Memory *{:.2}%* (exceeds {}%)",
                    c.name, c.cpu_percent, c.memory_percent, limits.container_memory_percent
                )
            } else {
                format!(
                    "{}: CPU {:.2}%, Memory {:.2}%",
                    c.name, c.cpu_percent, c.memory_percent
                )
            };
            AlertRow { text, breaching }
        })
        .collect();
    if containers.is_empty() {
        containers.push(AlertRow {
            text: "(none)".into(),
            breaching: false,
        });
    }
    lines.push(AlertLine::block(
        AlertCategory::Containers,
        "Docker Containers:",
        containers,
    ));

    let any_breach = lines.iter().any(AlertLine::has_breach);
    Evaluation { lines, any_breach }
}

fn percent_line(category: AlertCategory, label: &str, value: f64, limit: f64) -> AlertLine {
    let breaching = value > limit;
    let text = if breaching {
        format!("{label}: *{value:.2}%* (exceeds {limit}%)")
    } else {
        format!("{label}: {value:.2}%")
    };
    AlertLine::metric(category, text, breaching)
}

fn temp_line(category: AlertCategory, label: &str, value: f64, limit: f64) -> AlertLine {
    let breaching = value > limit;
    let text = if breaching {
        format!("{label}: *{value:.1}°C* (exceeds {limit}°C)")
    } else {
        format!("{label}: {value:.1}°C")
    };
    AlertLine::metric(category, text, breaching)
}
