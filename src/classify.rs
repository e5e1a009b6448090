//! Category classification and read-side filtering of the workload list.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::model::{Workload, WorkloadStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Bundle,
    Single,
    Database,
    Cache,
    Monitoring,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Bundle,
        Category::Single,
        Category::Database,
        Category::Cache,
        Category::Monitoring,
        Category::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Bundle => "Bundle",
            Category::Single => "Single",
            Category::Database => "Database",
            Category::Cache => "Cache/Queue",
            Category::Monitoring => "Monitoring",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bundle" => Ok(Category::Bundle),
            "single" => Ok(Category::Single),
            "database" | "db" => Ok(Category::Database),
            "cache" | "queue" => Ok(Category::Cache),
            "monitoring" => Ok(Category::Monitoring),
            "other" => Ok(Category::Other),
            other => Err(format!("unknown category {other:?}")),
        }
    }
}

/// Ordered prefix rules; the first match wins.
const RULES: &[(&str, Category)] = &[
    ("wordpress", Category::Bundle),
    ("nextcloud", Category::Bundle),
    ("ghost", Category::Bundle),
    ("nginx", Category::Single),
    ("custom", Category::Single),
    ("httpd", Category::Single),
    ("apache", Category::Single),
    ("postgres", Category::Database),
    ("mysql", Category::Database),
    ("mariadb", Category::Database),
    ("mongo", Category::Database),
    ("redis", Category::Database),
    ("memcached", Category::Cache),
    ("valkey", Category::Cache),
    ("rabbitmq", Category::Cache),
    ("nats", Category::Cache),
    ("kafka", Category::Cache),
    ("uptime-kuma", Category::Monitoring),
    ("grafana", Category::Monitoring),
    ("prometheus", Category::Monitoring),
];

/// Total: every type string, including empty or unknown ones, maps to one category.
pub fn classify(workload: &Workload) -> Category {
    classify_type(&workload.service_type)
}

pub fn classify_type(service_type: &str) -> Category {
    let t = service_type.trim().to_ascii_lowercase();
    RULES
        .iter()
        .find(|(prefix, _)| t.starts_with(prefix))
        .map(|(_, c)| *c)
        .unwrap_or(Category::Other)
}

/// Dashboard tab: everything, or one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    All,
    Only(Category),
}

impl Tab {
    pub const ALL: [Tab; 7] = [
        Tab::All,
        Tab::Only(Category::Bundle),
        Tab::Only(Category::Single),
        Tab::Only(Category::Database),
        Tab::Only(Category::Cache),
        Tab::Only(Category::Monitoring),
        Tab::Only(Category::Other),
    ];

    pub fn matches(self, workload: &Workload) -> bool {
        match self {
            Tab::All => true,
            Tab::Only(c) => classify(workload) == c,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tab::All => "All",
            Tab::Only(c) => c.label(),
        }
    }
}

/// Borrowing filter; the underlying list is never partitioned.
pub fn filter_by_tab(workloads: &[Workload], tab: Tab) -> Vec<&Workload> {
    workloads.iter().filter(|w| tab.matches(w)).collect()
}

/// Group workloads sharing a `group_id`, in first-seen order.
pub fn bundles(workloads: &[Workload]) -> Vec<(&str, Vec<&Workload>)> {
    let mut out: Vec<(&str, Vec<&Workload>)> = Vec::new();
    for w in workloads {
        let Some(gid) = w.group_id.as_deref() else {
            continue;
        };
        match out.iter_mut().find(|(g, _)| *g == gid) {
            Some((_, members)) => members.push(w),
            None => out.push((gid, vec![w])),
        }
    }
    out
}

/// Aggregate view of one snapshot, shown in the dashboard header and `summary`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InventorySummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_category: BTreeMap<Category, usize>,
    pub monthly_cost: f64,
    pub avg_cpu_percent: Option<f64>,
    pub avg_memory_percent: Option<f64>,
}

impl InventorySummary {
    pub fn from_workloads(workloads: &[Workload]) -> Self {
        let mut by_status = BTreeMap::new();
        let mut by_category = BTreeMap::new();
        for w in workloads {
            *by_status.entry(w.status.label().to_string()).or_insert(0) += 1;
            *by_category.entry(classify(w)).or_insert(0) += 1;
        }
        Self {
            total: workloads.len(),
            by_status,
            by_category,
            monthly_cost: workloads.iter().map(|w| w.cost).sum(),
            avg_cpu_percent: mean(workloads.iter().filter_map(|w| w.cpu_percent)),
            avg_memory_percent: mean(workloads.iter().filter_map(|w| w.memory_percent)),
        }
    }

    pub fn count(&self, status: WorkloadStatus) -> usize {
        self.by_status.get(status.label()).copied().unwrap_or(0)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}
