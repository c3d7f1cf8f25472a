use std::path::Path;
use similar::{ChangeTag, DiffOp, TextDiff};

const CONTEXT_LINES: usize = 3;

/// Line-level difference between two successive artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDiff {
    pub lines_added: usize,
    pub lines_removed: usize,
    /// Unified diff text, hunks separated by `...`
    pub unified: String,
}

impl OutputDiff {
    /// `None` when the two texts are identical
    pub fn between<P: AsRef<Path>>(old: &str, new: &str, label: P) -> Option<Self> {
        if old == new {
            return None;
        }

        let label = label.as_ref().display();
        let diff = TextDiff::from_lines(old, new);
        let mut lines_added = 0;
        let mut lines_removed = 0;
        let mut unified = vec![format!("--- {}", label), format!("+++ {}", label)];

        for (idx, group) in diff.grouped_ops(CONTEXT_LINES).iter().enumerate() {
            if idx > 0 {
                unified.push("...".to_string());
            }
            unified.push(hunk_header(group));

            for change in group.iter().flat_map(|op| diff.iter_changes(op)) {
                let sign = match change.tag() {
                    ChangeTag::Delete => {
                        lines_removed += 1;
                        '-'
                    }
                    ChangeTag::Insert => {
                        lines_added += 1;
                        '+'
                    }
                    ChangeTag::Equal => ' ',
                };
                unified.push(format!("{}{}", sign, change.value().trim_end()));
            }
        }

        Some(Self {
            lines_added,
            lines_removed,
            unified: unified.join("\n"),
        })
    }

    pub fn summary(&self) -> String {
        format!("+{} -{}", self.lines_added, self.lines_removed)
    }
}

fn hunk_header(group: &[DiffOp]) -> String {
    let (Some(first), Some(last)) = (group.first(), group.last()) else {
        return "@@ @@".to_string();
    };
    let old = first.old_range().start..last.old_range().end;
    let new = first.new_range().start..last.new_range().end;
    format!("@@ -{},{} +{},{} @@", old.start + 1, old.len(), new.start + 1, new.len())
}
