//! Line-level editing of the document text.
//!
//! Structured patches rewrite only the lines that hold the changed keys, so
//! operator comments and layout elsewhere survive. The streaming-user section
//! is the exception: it is regenerated entry by entry, with group labels
//! written as a comment line above each `- user:` item.

use crate::error::{ConfigError, ConfigResult};
use crate::users::StreamingUser;

/// Top-level key holding the streaming credentials.
pub(crate) const USERS_KEY: &str = "authInternalUsers";

const DEFAULT_CHILD_INDENT: usize = 2;

/// Set a top-level scalar, appending the key when it is missing.
pub(crate) fn set_top_level(text: &str, key: &str, rendered: &str) -> ConfigResult<String> {
    let mut lines = split_lines(text);
    if let Some(index) = lines.iter().position(|line| is_key_line(line, key)) {
        let line = &lines[index];
        let (value, comment) = split_value(line, key.len());
        if value.is_empty() && block_follows(&lines, index) {
            return Err(ConfigError::UnsupportedLayout { section: "top_level" });
        }
        lines[index] = format!("{key}: {rendered}{comment}\n");
    } else {
        ensure_trailing_newline(&mut lines);
        lines.push(format!("{key}: {rendered}\n"));
    }
    Ok(lines.concat())
}

/// Set (`Some`) or remove (`None`) a scalar one level below `section`.
pub(crate) fn set_nested(
    text: &str,
    section: &'static str,
    key: &str,
    rendered: Option<&str>,
) -> ConfigResult<String> {
    let mut lines = split_lines(text);
    let Some(header) = lines.iter().position(|line| is_key_line(line, section)) else {
        if let Some(rendered) = rendered {
            ensure_trailing_newline(&mut lines);
            lines.push(format!("{section}:\n"));
            lines.push(format!("{}{key}: {rendered}\n", " ".repeat(DEFAULT_CHILD_INDENT)));
        }
        return Ok(lines.concat());
    };

    let (inline, comment) = split_value(&lines[header], section.len());
    match inline.as_str() {
        "" => {}
        "{}" | "null" | "~" => lines[header] = format!("{section}:{comment}\n"),
        _ => return Err(ConfigError::UnsupportedLayout { section }),
    }

    let end = section_end(&lines, header);
    let indent = lines[header + 1..end]
        .iter()
        .find(|line| is_content(line))
        .map_or(DEFAULT_CHILD_INDENT, |line| indent_of(line));

    let existing = (header + 1..end).find(|&index| {
        let line = &lines[index];
        indent_of(line) == indent && is_key_line(&line[indent..], key)
    });

    match (existing, rendered) {
        (Some(index), Some(rendered)) => {
            let (value, comment) = split_value(&lines[index][indent..], key.len());
            if value.is_empty() && block_follows(&lines, index) {
                return Err(ConfigError::UnsupportedLayout { section });
            }
            lines[index] = format!("{}{key}: {rendered}{comment}\n", " ".repeat(indent));
        }
        (Some(index), None) => {
            lines.remove(index);
        }
        (None, Some(rendered)) => {
            lines.insert(header + 1, format!("{}{key}: {rendered}\n", " ".repeat(indent)));
        }
        (None, None) => {}
    }
    Ok(lines.concat())
}

/// Regenerate the streaming-user section from `users`.
pub(crate) fn replace_users(text: &str, users: &[StreamingUser]) -> ConfigResult<String> {
    let mut lines = split_lines(text);
    let header = lines.iter().position(|line| is_key_line(line, USERS_KEY));

    let (start, end, item_indent, comment) = if let Some(header) = header {
        let end = trim_trailing_trivia(&lines, header, section_end(&lines, header));
        let indent = item_indent(&lines[header + 1..end]).unwrap_or(0);
        let (_, comment) = split_value(&lines[header], USERS_KEY.len());
        (header, end, indent, comment)
    } else {
        ensure_trailing_newline(&mut lines);
        let at = lines.len();
        (at, at, 0, String::new())
    };

    let mut block = Vec::new();
    if users.is_empty() {
        block.push(format!("{USERS_KEY}: []{comment}\n"));
    } else {
        block.push(format!("{USERS_KEY}:{comment}\n"));
        let pad = " ".repeat(item_indent);
        for user in users {
            if let Some(label) = user.label.as_deref() {
                block.push(format!("{pad}# {}\n", label.trim()));
            }
            let rendered = serde_yaml::to_string(&[user.to_record()]).map_err(|err| {
                ConfigError::InvalidDocument {
                    reason: "failed to render streaming user",
                    detail: Some(err.to_string()),
                }
            })?;
            block.extend(rendered.lines().map(|line| format!("{pad}{line}\n")));
        }
    }

    lines.splice(start..end, block);
    Ok(lines.concat())
}

/// Group labels of the streaming-user items, in item order.
pub(crate) fn user_labels(text: &str) -> Vec<Option<String>> {
    let lines = split_lines(text);
    let Some(header) = lines.iter().position(|line| is_key_line(line, USERS_KEY)) else {
        return Vec::new();
    };
    let body = &lines[header + 1..section_end(&lines, header)];
    let Some(indent) = item_indent(body) else {
        return Vec::new();
    };

    let mut labels = Vec::new();
    let mut pending: Option<String> = None;
    for line in body {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            pending = None;
        } else if indent_of(line) != indent {
            pending = None;
        } else if let Some(comment) = trimmed.strip_prefix('#') {
            let label = comment.trim();
            pending = (!label.is_empty()).then(|| label.to_string());
        } else if trimmed.starts_with('-') {
            labels.push(pending.take());
        } else {
            pending = None;
        }
    }
    labels
}

fn split_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}

fn ensure_trailing_newline(lines: &mut [String]) {
    if let Some(last) = lines.last_mut()
        && !last.ends_with('\n')
    {
        last.push('\n');
    }
}

fn is_key_line(line: &str, key: &str) -> bool {
    line.strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(':'))
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn is_content(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

/// First line after `header` that starts another top-level key.
fn section_end(lines: &[String], header: usize) -> usize {
    lines
        .iter()
        .enumerate()
        .skip(header + 1)
        .find(|(_, line)| {
            line.chars()
                .next()
                .is_some_and(|c| !c.is_whitespace() && c != '#' && c != '-')
        })
        .map_or(lines.len(), |(index, _)| index)
}

/// Blank and comment lines ending a section belong to the key that follows.
fn trim_trailing_trivia(lines: &[String], header: usize, mut end: usize) -> usize {
    while end > header + 1 && !is_content(&lines[end - 1]) {
        end -= 1;
    }
    end
}

fn item_indent(body: &[String]) -> Option<usize> {
    body.iter()
        .find(|line| line.trim_start().starts_with('-'))
        .map(|line| indent_of(line))
}

fn block_follows(lines: &[String], index: usize) -> bool {
    let indent = indent_of(&lines[index]);
    lines
        .iter()
        .skip(index + 1)
        .find(|line| is_content(line))
        .is_some_and(|line| {
            let next = indent_of(line);
            next > indent || (next == indent && line.trim_start().starts_with('-'))
        })
}

/// Split `key: value  # comment` (with `key` already matched) into the value
/// text and the trailing comment, including its leading whitespace.
fn split_value(line: &str, key_len: usize) -> (String, String) {
    let rest = line[key_len + 1..].trim_end_matches(['\n', '\r']);
    let mut quote: Option<char> = None;
    let mut prev_space = true;
    for (offset, ch) in rest.char_indices() {
        match (quote, ch) {
            (Some(open), c) if c == open => quote = None,
            (None, '\'' | '"') => quote = Some(ch),
            (None, '#') if prev_space => {
                let value = rest[..offset].trim().to_string();
                let comment_start = rest[..offset].trim_end().len();
                return (value, rest[comment_start..].to_string());
            }
            _ => {}
        }
        prev_space = ch.is_whitespace();
    }
    (rest.trim().to_string(), String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{Action, Permission, Secret};

    const SAMPLE: &str = "\
# media server settings
logLevel: info # verbosity
rtsp: yes
rtspAddress: :8554

pathDefaults:
  # keep a week
  recordDeleteAfter: 168h
  record: no

# streaming users
authInternalUsers:
# Localhost
- user: any
  pass:
  ips: ['127.0.0.1']
  permissions:
  - action: publish
# Field crews
- user: crew
  pass: secret
  permissions:
  - action: read

# stream paths
paths:
  all_others:
";

    #[test]
    fn top_level_replacement_keeps_comment_and_neighbours() -> ConfigResult<()> {
        let edited = set_top_level(SAMPLE, "logLevel", "debug")?;
        assert!(edited.contains("logLevel: debug # verbosity\n"));
        assert_eq!(edited.replace("logLevel: debug", "logLevel: info"), SAMPLE);
        Ok(())
    }

    #[test]
    fn missing_top_level_key_is_appended() -> ConfigResult<()> {
        let edited = set_top_level("rtsp: yes", "srt", "no")?;
        assert_eq!(edited, "rtsp: yes\nsrt: no\n");
        Ok(())
    }

    #[test]
    fn block_valued_keys_are_not_overwritten() {
        assert!(matches!(
            set_top_level(SAMPLE, "pathDefaults", "x"),
            Err(ConfigError::UnsupportedLayout { .. })
        ));
    }

    #[test]
    fn nested_set_insert_and_remove() -> ConfigResult<()> {
        let replaced = set_nested(SAMPLE, "pathDefaults", "record", Some("yes"))?;
        assert!(replaced.contains("  record: yes\n"));
        assert!(replaced.contains("  # keep a week\n"));

        let inserted = set_nested(SAMPLE, "pathDefaults", "recordFormat", Some("fmp4"))?;
        assert!(inserted.contains("pathDefaults:\n  recordFormat: fmp4\n"));

        let removed = set_nested(SAMPLE, "pathDefaults", "recordDeleteAfter", None)?;
        assert!(!removed.contains("recordDeleteAfter"));
        Ok(())
    }

    #[test]
    fn nested_set_creates_section_and_expands_inline_empty() -> ConfigResult<()> {
        let created = set_nested("rtsp: yes\n", "pathDefaults", "record", Some("yes"))?;
        assert_eq!(created, "rtsp: yes\npathDefaults:\n  record: yes\n");

        let expanded = set_nested("pathDefaults: {}\n", "pathDefaults", "record", Some("no"))?;
        assert_eq!(expanded, "pathDefaults:\n  record: no\n");

        assert!(matches!(
            set_nested("pathDefaults: {record: no}\n", "pathDefaults", "record", Some("yes")),
            Err(ConfigError::UnsupportedLayout { section: "pathDefaults" })
        ));
        Ok(())
    }

    #[test]
    fn labels_are_read_positionally() {
        assert_eq!(
            user_labels(SAMPLE),
            vec![Some("Localhost".to_string()), Some("Field crews".to_string())]
        );
    }

    #[test]
    fn users_section_regenerates_without_touching_neighbours() -> ConfigResult<()> {
        let users = vec![StreamingUser {
            name: "cam1".to_string(),
            secret: Secret::new("123456"),
            label: Some("Drones".to_string()),
            permissions: vec![Permission::any_path(Action::Publish)],
            ips: Vec::new(),
        }];
        let edited = replace_users(SAMPLE, &users)?;

        assert!(edited.contains("authInternalUsers:\n# Drones\n- user: cam1\n"));
        assert!(edited.contains("'123456'"));
        assert!(edited.contains("\n# stream paths\npaths:\n"));
        assert!(edited.starts_with("# media server settings\nlogLevel: info # verbosity\n"));
        assert!(!edited.contains("crew"));
        assert_eq!(user_labels(&edited), vec![Some("Drones".to_string())]);
        Ok(())
    }

    #[test]
    fn empty_user_list_uses_flow_form() -> ConfigResult<()> {
        let edited = replace_users(SAMPLE, &[])?;
        assert!(edited.contains("authInternalUsers: []\n\n# stream paths\n"));
        assert!(user_labels(&edited).is_empty());
        Ok(())
    }

    #[test]
    fn comments_inside_quotes_are_values() {
        let (value, comment) = split_value("pass: 'a # b' # note\n", 4);
        assert_eq!(value, "'a # b'");
        assert_eq!(comment, " # note");
    }
}
