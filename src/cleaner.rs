//! Best-effort textual repair for generated questions, applied before
//! validation.
//!
//! This pass fixes the LaTeX corruption the model most often produces
//! (a leading backslash eaten from \frac / \binom / \sqrt), flattens stray
//! newlines, and wraps bare math commands in $...$ delimiters. It is a
//! heuristic string repair, not a LaTeX parser: adversarial input can be
//! mis-repaired, and text without recognized LaTeX tokens passes through
//! untouched.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::Question;
use crate::util::collapse_whitespace;

static MATH_COMMAND: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\\(frac|binom|sqrt|sum)").expect("static regex"));

/// Clean one question in place: whitespace, LaTeX repair, math delimiters,
/// and answer-letter normalization (casing/stray punctuation only — real
/// validation still happens afterwards).
pub fn clean(mut q: Question) -> Question {
  q.question = clean_text(&q.question);
  q.explanation = clean_text(&q.explanation);
  for opt in &mut q.options {
    *opt = clean_text(opt);
  }
  q.answer = normalize_answer(&q.answer);
  q
}

fn clean_text(s: &str) -> String {
  let s = collapse_whitespace(s);
  let s = repair_latex(&s);
  wrap_math(&s)
}

/// Restore eaten backslash prefixes: a bare `rac{` becomes `\frac{`, bare
/// `inom{` becomes `\binom{`, bare `sqrt{` becomes `\sqrt{`. Occurrences
/// already carrying their prefix are left alone.
fn repair_latex(s: &str) -> String {
  let s = repair_token(s, "rac{", 'f', "\\frac{");
  let s = repair_token(&s, "inom{", 'b', "\\binom{");
  repair_token(&s, "sqrt{", '\\', "\\sqrt{")
}

/// Replace `needle` with `replacement` wherever it is not preceded by
/// `guard` (the character that would make it part of an intact command).
fn repair_token(s: &str, needle: &str, guard: char, replacement: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut idx = 0usize;
  while let Some(pos) = s[idx..].find(needle) {
    let abs = idx + pos;
    out.push_str(&s[idx..abs]);
    if s[..abs].chars().last() == Some(guard) {
      out.push_str(needle);
    } else {
      out.push_str(replacement);
    }
    idx = abs + needle.len();
  }
  out.push_str(&s[idx..]);
  out
}

/// Wrap bare math commands (and their argument groups) in `$...$` when they
/// are not already inside delimiters.
fn wrap_math(s: &str) -> String {
  if !MATH_COMMAND.is_match(s) {
    return s.to_string();
  }
  let chars: Vec<char> = s.chars().collect();
  let mut out = String::with_capacity(s.len() + 8);
  let mut in_math = false;
  let mut i = 0usize;
  while i < chars.len() {
    let ch = chars[i];
    if ch == '$' {
      in_math = !in_math;
      out.push(ch);
      i += 1;
      continue;
    }
    if !in_math && ch == '\\' {
      if let Some(len) = math_command_len(&chars[i..]) {
        let end = consume_arguments(&chars, i + len);
        out.push('$');
        out.extend(&chars[i..end]);
        out.push('$');
        i = end;
        continue;
      }
    }
    out.push(ch);
    i += 1;
  }
  out
}

/// Length of a recognized math command at the start of `chars`, if any.
fn math_command_len(chars: &[char]) -> Option<usize> {
  for cmd in ["\\frac", "\\binom", "\\sqrt", "\\sum"] {
    let cmd_chars: Vec<char> = cmd.chars().collect();
    if chars.len() >= cmd_chars.len() && chars[..cmd_chars.len()] == cmd_chars[..] {
      return Some(cmd_chars.len());
    }
  }
  None
}

/// Consume `{...}` argument groups and `^`/`_` scripts following a command,
/// so `\frac{1}{2}` is wrapped as a whole.
fn consume_arguments(chars: &[char], mut i: usize) -> usize {
  loop {
    match chars.get(i) {
      Some('{') => {
        let mut depth = 0usize;
        while i < chars.len() {
          match chars[i] {
            '{' => depth += 1,
            '}' => {
              depth -= 1;
              if depth == 0 {
                i += 1;
                break;
              }
            }
            _ => {}
          }
          i += 1;
        }
      }
      Some('^') | Some('_') => {
        i += 1;
        // A bare script argument (\sum^2) is a single char, not a group.
        if chars.get(i).map_or(false, |c| *c != '{') {
          i += 1;
        }
      }
      _ => return i,
    }
  }
}

/// Coerce borderline answer values ("a", " b) ", "C.") to a bare letter.
/// This is a casing/punctuation convenience, not a substitute for rejection:
/// anything that is not a single A–D after trimming is returned as-is and
/// left for the validator to drop.
pub fn normalize_answer(raw: &str) -> String {
  let stripped: String = raw
    .chars()
    .filter(|c| c.is_ascii_alphanumeric())
    .collect();
  if stripped.len() == 1 {
    let up = stripped.to_ascii_uppercase();
    if matches!(up.as_str(), "A" | "B" | "C" | "D") {
      return up;
    }
  }
  raw.trim().to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn q(text: &str) -> Question {
    Question {
      question: text.to_string(),
      options: vec!["1".into(), "2".into(), "3".into(), "4".into()],
      answer: "A".into(),
      explanation: String::new(),
    }
  }

  #[test]
  fn bare_frac_is_repaired() {
    let cleaned = clean(q("What is rac{1}{2} of 4?"));
    assert!(cleaned.question.contains("\\frac{1}{2}"), "{}", cleaned.question);
  }

  #[test]
  fn intact_commands_are_not_double_repaired() {
    let cleaned = clean(q("Evaluate $\\frac{1}{2}$?"));
    assert!(!cleaned.question.contains("\\\\frac"));
    assert!(cleaned.question.contains("$\\frac{1}{2}$"));
  }

  #[test]
  fn bare_commands_get_delimiters() {
    let cleaned = clean(q("Evaluate \\sqrt{16} now?"));
    assert!(cleaned.question.contains("$\\sqrt{16}$"), "{}", cleaned.question);
  }

  #[test]
  fn cleaner_is_idempotent_on_clean_text() {
    let once = clean(q("Evaluate \\frac{1}{2} + rac{1}{4}?"));
    let twice = clean(once.clone());
    assert_eq!(once, twice);
  }

  #[test]
  fn token_free_text_is_untouched() {
    let cleaned = clean(q("Which planet is largest?"));
    assert_eq!(cleaned.question, "Which planet is largest?");
  }

  #[test]
  fn newlines_collapse_in_all_fields() {
    let mut input = q("What\nis  it?");
    input.options[0] = "first\noption".into();
    let cleaned = clean(input);
    assert_eq!(cleaned.question, "What is it?");
    assert_eq!(cleaned.options[0], "first option");
  }

  #[test]
  fn answer_casing_is_normalized() {
    assert_eq!(normalize_answer(" b) "), "B");
    assert_eq!(normalize_answer("C."), "C");
    assert_eq!(normalize_answer("E"), "E");
    assert_eq!(normalize_answer("AB"), "AB");
  }
}
