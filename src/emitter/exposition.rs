//! Text Exposition
//!
//! Renders a registry snapshot in the line-oriented pull format the
//! collector parses: a `# TYPE` line per family, then one
//! `name{label="value",...} value` line per child. Output is deterministic:
//! families sorted by name, children sorted by label set.

use crate::domain::model::Labels;
use crate::emitter::registry::{Family, MetricRegistry};

/// Render the full registry as text exposition.
pub fn render(registry: &MetricRegistry) -> String {
    let mut output = String::new();

    for (name, family) in registry.families() {
        match family {
            Family::Counter(family) => {
                output.push_str(&format!("# TYPE {} counter\n", name));
                for (labels, value) in family.snapshot() {
                    output.push_str(&format!(
                        "{}{} {}\n",
                        name,
                        render_labels(&labels),
                        value
                    ));
                }
            }
            Family::Gauge(family) => {
                output.push_str(&format!("# TYPE {} gauge\n", name));
                for (labels, value) in family.snapshot() {
                    output.push_str(&format!(
                        "{}{} {}\n",
                        name,
                        render_labels(&labels),
                        value
                    ));
                }
            }
            Family::Histogram(family) => {
                output.push_str(&format!("# TYPE {} histogram\n", name));
                for child in family.snapshot() {
                    for bucket in &child.buckets {
                        let le = child.labels.clone().with("le", format_f64(bucket.le));
                        output.push_str(&format!(
                            "{}_bucket{} {}\n",
                            name,
                            render_labels(&le),
                            bucket.count
                        ));
                    }
                    // The +Inf bucket is cumulative over everything, so it
                    // always equals the observation count
                    let inf = child.labels.clone().with("le", "+Inf");
                    output.push_str(&format!(
                        "{}_bucket{} {}\n",
                        name,
                        render_labels(&inf),
                        child.count
                    ));
                    output.push_str(&format!(
                        "{}_sum{} {}\n",
                        name,
                        render_labels(&child.labels),
                        format_f64(child.sum)
                    ));
                    output.push_str(&format!(
                        "{}_count{} {}\n",
                        name,
                        render_labels(&child.labels),
                        child.count
                    ));
                }
            }
        }
    }

    output
}

/// Render a label set, empty string for no labels.
fn render_labels(labels: &Labels) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = labels
        .iter()
        .map(|(name, value)| format!("{}=\"{}\"", name, escape_value(value)))
        .collect();
    format!("{{{}}}", pairs.join(","))
}

/// Escape backslashes and double quotes in a label value.
fn escape_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Format an f64 without trailing noise (`1` not `1.0`, but `0.5` stays).
fn format_f64(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
