//! Text output builders for one-shot commands.
//!
//! Each builder returns pre-formatted lines; callers decide where they go.

use crate::classify::{classify, bundles, Category, InventorySummary};
use crate::model::{
    AutoBackupPolicy, BackupRecord, EnvVars, MetricsSample, ScalingConfig, VolumeDescriptor,
    Workload,
};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

fn or_dash(v: Option<&str>) -> &str {
    match v {
        Some(s) if !s.trim().is_empty() => s,
        _ => "-",
    }
}

fn pct(v: Option<f64>) -> String {
    v.map(|p| format!("{p:.1}%")).unwrap_or_else(|| "-".into())
}

/// Workload table in snapshot order.
pub(crate) fn workload_table(workloads: &[&Workload]) -> TextSummary {
    let name_w = workloads
        .iter()
        .map(|w| w.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    let type_w = workloads
        .iter()
        .map(|w| w.service_type.len())
        .max()
        .unwrap_or(0)
        .max("TYPE".len());

    let mut lines = Vec::with_capacity(workloads.len() + 1);
    lines.push(format!(
        "{:<name_w$}  {:<type_w$}  {:<11}  {:<10}  {:<8}  {:>8}  {:>6}  {:>6}  {:>9}",
        "NAME", "TYPE", "CATEGORY", "STATUS", "AGE", "RESTARTS", "CPU", "MEM", "COST/MO"
    ));
    for w in workloads {
        lines.push(format!(
            "{:<name_w$}  {:<type_w$}  {:<11}  {:<10}  {:<8}  {:>8}  {:>6}  {:>6}  {:>9}",
            w.name,
            w.service_type,
            classify(w).label(),
            w.status.label(),
            or_dash(Some(&w.age)),
            w.restart_count,
            pct(w.cpu_percent),
            pct(w.memory_percent),
            format!("${:.2}", w.cost),
        ));
    }
    if workloads.is_empty() {
        lines.push("(no workloads)".into());
    }
    TextSummary { lines }
}

/// Header lines for the dashboard and the `summary` command.
pub(crate) fn inventory_summary(workloads: &[Workload]) -> TextSummary {
    let s = InventorySummary::from_workloads(workloads);
    let mut lines = Vec::new();
    lines.push(format!(
        "Workloads: {}  |  Est. monthly cost: ${:.2}",
        s.total, s.monthly_cost
    ));
    if !s.by_status.is_empty() {
        let statuses: Vec<String> = s
            .by_status
            .iter()
            .map(|(k, v)| format!("{k} {v}"))
            .collect();
        lines.push(format!("Status: {}", statuses.join(", ")));
    }
    let cats: Vec<String> = Category::ALL
        .iter()
        .filter_map(|c| s.by_category.get(c).map(|n| format!("{} {n}", c.label())))
        .collect();
    if !cats.is_empty() {
        lines.push(format!("Categories: {}", cats.join(", ")));
    }
    if s.avg_cpu_percent.is_some() || s.avg_memory_percent.is_some() {
        lines.push(format!(
            "Average usage: CPU {}  Memory {}",
            pct(s.avg_cpu_percent),
            pct(s.avg_memory_percent)
        ));
    }
    let groups = bundles(workloads);
    for (gid, members) in groups {
        let names: Vec<&str> = members.iter().map(|w| w.name.as_str()).collect();
        lines.push(format!("Bundle {gid}: {}", names.join(", ")));
    }
    TextSummary { lines }
}

pub(crate) fn workload_info(w: &Workload) -> TextSummary {
    let lines = vec![
        format!("Name:       {}", w.name),
        format!("Type:       {} ({})", w.service_type, classify(w).label()),
        format!("Status:     {}", w.status.label()),
        format!("Age:        {}", or_dash(Some(&w.age))),
        format!("Restarts:   {}", w.restart_count),
        format!("CPU:        {}", pct(w.cpu_percent)),
        format!("Memory:     {}", pct(w.memory_percent)),
        format!("Cost/month: ${:.2}", w.cost),
        format!("Bundle:     {}", or_dash(w.group_id.as_deref())),
        format!("Address:    {}", or_dash(w.external_address.as_deref())),
    ];
    TextSummary { lines }
}

pub(crate) fn metrics_lines(m: &MetricsSample) -> TextSummary {
    TextSummary {
        lines: vec![
            format!("CPU:    {} ({})", or_dash(Some(&m.cpu)), pct(m.cpu_percent)),
            format!("Memory: {} ({})", or_dash(Some(&m.memory)), pct(m.memory_percent)),
        ],
    }
}

pub(crate) fn env_lines(env: &EnvVars) -> TextSummary {
    if env.is_empty() {
        return TextSummary {
            lines: vec!["(no environment variables)".into()],
        };
    }
    TextSummary {
        lines: env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
    }
}

pub(crate) fn storage_lines(volumes: &[VolumeDescriptor]) -> TextSummary {
    if volumes.is_empty() {
        return TextSummary {
            lines: vec!["(no volumes)".into()],
        };
    }
    TextSummary {
        lines: volumes
            .iter()
            .map(|v| {
                format!(
                    "{}  {}  {}  {}",
                    v.name,
                    v.size_gb
                        .map(|s| format!("{s} GB"))
                        .unwrap_or_else(|| "-".into()),
                    or_dash(v.mount_path.as_deref()),
                    or_dash(v.status.as_deref()),
                )
            })
            .collect(),
    }
}

pub(crate) fn scaling_lines(cfg: Option<&ScalingConfig>) -> TextSummary {
    let lines = match cfg {
        None => vec!["Autoscaling: not configured".into()],
        Some(c) => vec![format!(
            "Autoscaling: {}-{} replicas, target CPU {}%",
            c.min_replicas, c.max_replicas, c.cpu_target_percent
        )],
    };
    TextSummary { lines }
}

pub(crate) fn backup_lines(backups: &[BackupRecord]) -> TextSummary {
    if backups.is_empty() {
        return TextSummary {
            lines: vec!["(no backups)".into()],
        };
    }
    TextSummary {
        lines: backups
            .iter()
            .map(|b| format!("{}  {:?}  {}", b.name, b.status, or_dash(b.created_at.as_deref())))
            .collect(),
    }
}

pub(crate) fn auto_backup_lines(policy: Option<&AutoBackupPolicy>) -> TextSummary {
    let lines = match policy {
        Some(p) if p.enabled => vec![format!(
            "Automatic backups: enabled, schedule \"{}\", keep {}",
            p.schedule, p.retention
        )],
        _ => vec!["Automatic backups: disabled".into()],
    };
    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_header_and_one_row_per_workload() {
        let a = Workload::new("wp-1", "wordpress");
        let b = Workload::new("nginx-1", "nginx");
        let t = workload_table(&[&a, &b]);
        assert_eq!(t.lines.len(), 3);
        assert!(t.lines[0].starts_with("NAME"));
        assert!(t.lines[1].contains("Bundle"));
        assert!(t.lines[2].contains("Single"));
        assert_eq!(workload_table(&[]).lines[1], "(no workloads)");
    }

    #[test]
    fn summary_lists_bundles() {
        let mut a = Workload::new("wp-1", "wordpress");
        a.group_id = Some("g1".into());
        let mut b = Workload::new("wp-1-db", "mysql");
        b.group_id = Some("g1".into());
        a.cost = 3.0;
        let t = inventory_summary(&[a, b]);
        assert!(t.lines[0].contains("Workloads: 2"));
        assert!(t.lines[0].contains("$3.00"));
        assert!(t.lines.iter().any(|l| l == "Bundle g1: wp-1, wp-1-db"));
        assert!(t
            .lines
            .iter()
            .any(|l| l == "Categories: Bundle 1, Database 1"));
    }

    #[test]
    fn empty_env_is_explicit() {
        assert_eq!(
            env_lines(&EnvVars::default()).lines,
            vec!["(no environment variables)".to_string()]
        );
        let env = EnvVars::from_pairs([("b", "2"), ("a", "1")]);
        assert_eq!(env_lines(&env).lines, vec!["A=1", "B=2"]);
    }
}
