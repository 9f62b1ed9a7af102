//! Advisory risk scoring for a migration session.
//!
//! The score is a deterministic weighted sum, stable across runs:
//!
//! | factor                                   | weight            |
//! |------------------------------------------|-------------------|
//! | affected file count                      | 2 per file        |
//! | total change count                       | 1 each, capped 20 |
//! | tier-2 changes                           | 3 each            |
//! | tier-3 changes                           | 8 each            |
//! | sensitive path (`auth`, `security`, `config`, `migrations`) | 10 per file, capped 20 |
//! | fraction of changes below high confidence| up to 25          |
//!
//! Levels: `< 25` low, `< 60` moderate, otherwise high. The result is
//! advisory only; it never gates apply.

use std::path::Path;

use crate::types::{Confidence, Diagnostic, Patch, RiskLevel, RiskReport, Tier};

const SENSITIVE_MARKERS: &[&str] = &["auth", "security", "config", "migrations"];

/// Score a set of patches plus the session diagnostics.
pub fn score(patches: &[Patch], diagnostics: &[Diagnostic]) -> RiskReport {
    let _ = diagnostics; // reserved for future weighting
    let mut factors = Vec::new();

    let affected = patches.iter().filter(|p| !p.changes.is_empty()).count();
    let mut total: u32 = (affected as u32) * 2;
    if affected > 0 {
        factors.push(format!("{affected} file(s) affected"));
    }

    let change_count: usize = patches.iter().map(|p| p.changes.len()).sum();
    total += (change_count as u32).min(20);
    if change_count > 0 {
        factors.push(format!("{change_count} change(s)"));
    }

    let tier2 = patches
        .iter()
        .flat_map(|p| &p.changes)
        .filter(|c| c.tier == Tier::Tier2)
        .count();
    let tier3 = patches
        .iter()
        .flat_map(|p| &p.changes)
        .filter(|c| c.tier == Tier::Tier3)
        .count();
    total += (tier2 as u32) * 3 + (tier3 as u32) * 8;
    if tier2 > 0 {
        factors.push(format!("{tier2} tier-2 change(s)"));
    }
    if tier3 > 0 {
        factors.push(format!("{tier3} oracle-led tier-3 change(s)"));
    }

    let sensitive = patches
        .iter()
        .filter(|p| !p.changes.is_empty() && is_sensitive(&p.path))
        .count();
    total += ((sensitive as u32) * 10).min(20);
    if sensitive > 0 {
        factors.push(format!("{sensitive} change(s) in sensitive paths"));
    }

    if change_count > 0 {
        let sub_high = patches
            .iter()
            .flat_map(|p| &p.changes)
            .filter(|c| c.confidence < Confidence::High)
            .count();
        let fraction = sub_high as f64 / change_count as f64;
        total += (fraction * 25.0).round() as u32;
        if sub_high > 0 {
            factors.push(format!("{sub_high} change(s) below high confidence"));
        }
    }

    let score = total.min(100) as u8;
    RiskReport {
        score,
        level: level_for(score),
        factors,
    }
}

fn level_for(score: u8) -> RiskLevel {
    match score {
        0..=24 => RiskLevel::Low,
        25..=59 => RiskLevel::Moderate,
        _ => RiskLevel::High,
    }
}

fn is_sensitive(path: &Path) -> bool {
    let text = path.display().to_string().to_lowercase();
    SENSITIVE_MARKERS.iter().any(|m| text.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeKind, ChangeRecord, PatchState};
    use std::path::PathBuf;

    fn patch(path: &str, changes: Vec<ChangeRecord>) -> Patch {
        Patch {
            path: PathBuf::from(path),
            sha: "0".to_string(),
            state: PatchState::Ready,
            tier: Tier::Tier1,
            original_source: String::new(),
            patched_source: String::new(),
            diff: String::new(),
            changes,
        }
    }

    fn change(tier: Tier, confidence: Confidence) -> ChangeRecord {
        ChangeRecord {
            rule: "r".to_string(),
            kind: ChangeKind::MethodRename,
            tier,
            confidence,
            description: String::new(),
            line: 1,
        }
    }

    #[test]
    fn small_high_confidence_session_is_low_risk() {
        let patches = vec![patch(
            "models.py",
            vec![
                change(Tier::Tier1, Confidence::High),
                change(Tier::Tier1, Confidence::High),
            ],
        )];
        let report = score(&patches, &[]);
        assert_eq!(report.level, RiskLevel::Low);
        // 1 file * 2 + 2 changes = 4
        assert_eq!(report.score, 4);
    }

    #[test]
    fn tier3_changes_weigh_heavily() {
        let patches = vec![patch(
            "svc.py",
            (0..5).map(|_| change(Tier::Tier3, Confidence::Low)).collect(),
        )];
        let report = score(&patches, &[]);
        assert!(report.score >= 60, "score was {}", report.score);
        assert_eq!(report.level, RiskLevel::High);
    }

    #[test]
    fn sensitive_paths_raise_the_score() {
        let plain = score(
            &[patch("api.py", vec![change(Tier::Tier1, Confidence::High)])],
            &[],
        );
        let sensitive = score(
            &[patch(
                "auth/login.py",
                vec![change(Tier::Tier1, Confidence::High)],
            )],
            &[],
        );
        assert!(sensitive.score > plain.score);
        assert!(sensitive
            .factors
            .iter()
            .any(|f| f.contains("sensitive")));
    }

    #[test]
    fn scoring_is_deterministic() {
        let patches = vec![patch(
            "a.py",
            vec![
                change(Tier::Tier1, Confidence::High),
                change(Tier::Tier2, Confidence::Medium),
            ],
        )];
        let first = score(&patches, &[]);
        let second = score(&patches, &[]);
        assert_eq!(first.score, second.score);
        assert_eq!(first.factors, second.factors);
    }

    #[test]
    fn empty_session_scores_zero() {
        let report = score(&[], &[]);
        assert_eq!(report.score, 0);
        assert_eq!(report.level, RiskLevel::Low);
    }
}
