//! Shared utility functions for the hatrack crate.

/// Split a markdown document into its YAML frontmatter and body.
///
/// The frontmatter must open on the first line with `---` and close with a
/// line that is exactly `---`. Returns `None` when there is no frontmatter.
pub fn split_frontmatter(text: &str) -> Option<(&str, &str)> {
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}

/// Render frontmatter YAML and a body back into a markdown document.
pub fn render_frontmatter(yaml: &str, body: &str) -> String {
    let yaml = yaml.trim_end_matches('\n');
    format!("---\n{}\n---\n{}", yaml, body)
}

/// Collect the list items under a `## <heading>` section.
///
/// Checkbox markers (`- [ ]`, `- [x]`) and plain bullets are both accepted;
/// the section ends at the next heading of the same or higher level.
pub fn section_items(body: &str, heading: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut inside = false;

    for line in body.lines() {
        let trimmed = line.trim();
        if let Some(title) = trimmed.strip_prefix("## ") {
            inside = title.trim().eq_ignore_ascii_case(heading);
            continue;
        }
        if trimmed.starts_with("# ") {
            inside = false;
            continue;
        }
        if !inside {
            continue;
        }

        let Some(item) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        else {
            continue;
        };
        let item = item
            .strip_prefix("[ ] ")
            .or_else(|| item.strip_prefix("[x] "))
            .or_else(|| item.strip_prefix("[X] "))
            .unwrap_or(item)
            .trim();
        if !item.is_empty() {
            items.push(item.to_string());
        }
    }

    items
}

/// Encode a branch name into a single filesystem path segment.
pub fn encode_branch(branch: &str) -> String {
    branch.replace('%', "%25").replace('/', "%2F")
}

/// Reverse of [`encode_branch`].
pub fn decode_branch(segment: &str) -> String {
    segment.replace("%2F", "/").replace("%25", "%")
}
