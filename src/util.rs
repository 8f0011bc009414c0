//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Collapse newlines and runs of whitespace into single spaces, then trim.
/// Model output frequently arrives with stray line breaks inside options.
pub fn collapse_whitespace(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut last_was_space = false;
  for ch in s.chars() {
    if ch.is_whitespace() {
      if !last_was_space && !out.is_empty() {
        out.push(' ');
      }
      last_was_space = true;
    } else {
      out.push(ch);
      last_was_space = false;
    }
  }
  while out.ends_with(' ') {
    out.pop();
  }
  out
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
#[allow(dead_code)]
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    s.to_string()
  } else {
    let mut end = max;
    while !s.is_char_boundary(end) {
      end -= 1;
    }
    format!("{}… ({} bytes total)", &s[..end], s.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fill_template_replaces_all_occurrences() {
    let out = fill_template("{a} + {a} = {b}", &[("a", "1"), ("b", "2")]);
    assert_eq!(out, "1 + 1 = 2");
  }

  #[test]
  fn collapse_whitespace_flattens_newlines() {
    assert_eq!(collapse_whitespace("a\n\n  b\tc "), "a b c");
    assert_eq!(collapse_whitespace("  already clean  "), "already clean");
  }
}
