//! Markdown rendering of an analysis.

use std::collections::BTreeMap;

use crate::detect::Issue;
use crate::pipeline::Analysis;

fn rate(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}%", v * 100.0))
}

fn endings(counts: &BTreeMap<String, u32>) -> String {
    if counts.is_empty() {
        return "-".to_string();
    }
    counts
        .iter()
        .map(|(ending, n)| format!("{ending} {n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Analysis {
    /// Issues ordered by severity, most severe first; ties keep rule order.
    #[must_use]
    pub fn issues_by_severity(&self) -> Vec<&Issue> {
        let mut sorted: Vec<&Issue> = self.issues.iter().collect();
        sorted.sort_by(|a, b| b.severity.priority().cmp(&a.severity.priority()));
        sorted
    }

    /// Render as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str("# Balance Tuning Report\n\n");

        md.push_str("## Segments\n\n");
        md.push_str(
            "| Segment | Sessions | Win Rate | Early Deaths | Error Rate | Avg Days | Achievements | Events/Day | Endings |\n\
             |---------|----------|----------|--------------|------------|----------|--------------|------------|---------|\n",
        );
        for m in &self.aggregation.segments {
            let per_day = m
                .random_events_per_day()
                .map_or_else(|| "-".to_string(), |r| format!("{r:.2}"));
            md.push_str(&format!(
                "| {} | {} | {} | {:.0}% | {:.0}% | {:.1} | {:.1} | {} | {} |\n",
                m.segment,
                m.session_count,
                rate(m.win_rate),
                m.early_death_rate * 100.0,
                m.error_rate * 100.0,
                m.avg_survival_days,
                m.avg_achievements,
                per_day,
                endings(&m.endings)
            ));
        }

        if !self.issues.is_empty() {
            md.push_str("\n## Issues Detected\n\n");
            for issue in self.issues_by_severity() {
                let tag = if issue.advisory { " (advisory)" } else { "" };
                md.push_str(&format!(
                    "- **[{:?}]** {} {}{}: {:.2} (threshold {:.2})\n",
                    issue.severity,
                    issue.segment,
                    issue.kind.label(),
                    tag,
                    issue.evidence.value,
                    issue.evidence.threshold
                ));
                md.push_str(&format!("  - {}\n", issue.rationale));
            }
        }

        if !self.adjustments.is_empty() {
            md.push_str("\n## Adjustments\n\n");
            for (i, adjustment) in self.adjustments.adjustments.iter().enumerate() {
                md.push_str(&format!(
                    "{}. **{}**: x{:.4} ({:+.1}%)\n",
                    i + 1,
                    adjustment.parameter_key,
                    adjustment.multiplier,
                    adjustment.percent_change()
                ));
                md.push_str(&format!("   - Reasoning: {}\n", adjustment.rationale));
            }
        }

        md.push_str("\n## Insights\n\n");
        for insight in &self.adjustments.insights {
            md.push_str(&format!("- {insight}\n"));
        }

        let stats = &self.stats;
        md.push_str(&format!(
            "\n---\n*Analyzed {} sessions from {} records in {} sources \
             ({} malformed lines skipped, {} sources unreadable, {} sessions without a segment)*\n",
            self.session_count(),
            stats.records,
            stats.sources_read,
            stats.skipped_malformed,
            stats.sources_skipped,
            self.aggregation.unclassifiable
        ));
        md
    }
}

#[cfg(test)]
mod tests {
    use crate::ingest::{MemorySource, TelemetrySource};
    use crate::pipeline::analyze;
    use crate::rules::RuleSet;

    #[test]
    fn test_markdown_sections() {
        let mut text = String::new();
        for i in 0..6 {
            text.push_str(&format!(
                "{{\"kind\":\"death\",\"timestamp\":\"01\",\"session_id\":\"s{i}\",\"theme\":\"swamp\",\"difficulty\":\"hard\",\"cause\":\"disease\",\"progress_pct\":5}}\n"
            ));
        }
        text.push_str("garbage\n");
        let source = TelemetrySource::Memory(vec![MemorySource::new("mem", text)]);
        let analysis = analyze(&source, &RuleSet::default());
        let md = analysis.to_markdown();

        assert!(md.contains("| swamp/hard | 6 | 0.0% |"));
        assert!(md.contains("too-hard"));
        // No cause rule for disease.
        assert!(md.contains("single-cause-death-dominance(disease) (advisory)"));
        assert!(md.contains("theme.swamp.supply_multiplier"));
        assert!(md.contains("theme.swamp.early_game_difficulty"));
        assert!(md.contains("1 malformed lines skipped"));

        // No day on any event: no achievements, no event rate, no endings.
        assert!(md.contains("| 0.0 | 0.0 | - | - |"));

        let first = analysis.issues_by_severity()[0];
        assert_eq!(first.severity, crate::detect::Severity::Critical);
    }

    #[test]
    fn test_segment_row_shows_endings_and_event_rate() {
        let mut text = String::new();
        for i in 0..2 {
            text.push_str(&format!(
                "{{\"kind\":\"random_event\",\"timestamp\":\"01\",\"session_id\":\"w{i}\",\"event\":\"storm\"}}\n\
                 {{\"kind\":\"achievement\",\"timestamp\":\"02\",\"session_id\":\"w{i}\",\"achievement\":\"arrived\"}}\n\
                 {{\"kind\":\"victory\",\"timestamp\":\"03\",\"session_id\":\"w{i}\",\"theme\":\"tundra\",\"difficulty\":\"easy\",\"ending\":\"heroic\",\"day\":10}}\n"
            ));
        }
        let source = TelemetrySource::Memory(vec![MemorySource::new("mem", text)]);
        let md = analyze(&source, &RuleSet::default()).to_markdown();

        assert!(md.contains("| tundra/easy | 2 | 100.0% | 0% | 0% | 10.0 | 1.0 | 0.10 | heroic 2 |"));
    }
}
