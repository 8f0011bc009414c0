//! Math-aware text canonicalization for duplicate detection.
//!
//! `normalize_math` is used only for equality comparison between option
//! strings in STEM subjects; its output is never shown to users. It folds
//! LaTeX fraction syntax into a plain `(A)/(B)` spelling and folds common
//! decimal literals into fractions so "0.5" and "1/2" collide.

/// Canonicalize mathematical text for comparison. Steps, in order:
/// lowercase/trim, strip sizing directives, rewrite `\frac{A}{B}` to
/// `(A)/(B)`, remove whitespace, fold common decimals into fractions.
/// Remaining braces are kept: `e^{x+1}` must stay distinct from `e^x+1`.
pub fn normalize_math(text: &str) -> String {
  let mut s = text.trim().to_lowercase();
  s = s.replace("\\left", "").replace("\\right", "");
  s = rewrite_fracs(&s);
  s.retain(|c| !c.is_whitespace());
  rewrite_decimals(&s)
}

/// Rewrite every `\frac{A}{B}` into `(A)/(B)` using a balanced-brace scan,
/// so nested braces inside A or B survive. Malformed fractions are left
/// untouched.
fn rewrite_fracs(s: &str) -> String {
  let mut out = s.to_string();
  loop {
    let Some(start) = out.find("\\frac{") else { break };
    let a_open = start + "\\frac".len();
    let Some((a, a_end)) = read_braced(&out, a_open) else { break };
    if out.as_bytes().get(a_end) != Some(&b'{') {
      break;
    }
    let Some((b, b_end)) = read_braced(&out, a_end) else { break };
    out.replace_range(start..b_end, &format!("({})/({})", a, b));
  }
  out
}

/// Read a `{...}` group starting at byte index `open` (which must be `{`).
/// Returns the inner content and the byte index just past the closing `}`.
fn read_braced(s: &str, open: usize) -> Option<(String, usize)> {
  if s.as_bytes().get(open) != Some(&b'{') {
    return None;
  }
  let mut depth = 0usize;
  for (off, ch) in s[open..].char_indices() {
    match ch {
      '{' => depth += 1,
      '}' => {
        depth -= 1;
        if depth == 0 {
          let end = open + off + 1;
          return Some((s[open + 1..end - 1].to_string(), end));
        }
      }
      _ => {}
    }
  }
  None
}

/// Fold common decimal literals into fraction tokens, boundary-aware: a
/// digit immediately before or after the literal disqualifies the match
/// ("10.5" is not "1" + one half).
fn rewrite_decimals(s: &str) -> String {
  let chars: Vec<char> = s.chars().collect();
  let mut out = String::with_capacity(s.len());
  let mut i = 0usize;
  while i < chars.len() {
    if chars[i] == '0'
      && i + 1 < chars.len()
      && chars[i + 1] == '.'
      && (i == 0 || !chars[i - 1].is_ascii_digit())
    {
      let run_start = i + 2;
      let mut run_end = run_start;
      while run_end < chars.len() && chars[run_end].is_ascii_digit() {
        run_end += 1;
      }
      let run: String = chars[run_start..run_end].iter().collect();
      if let Some(frac) = fraction_for(&run) {
        out.push_str(frac);
        i = run_end;
        continue;
      }
    }
    out.push(chars[i]);
    i += 1;
  }
  out
}

fn fraction_for(digits: &str) -> Option<&'static str> {
  match digits {
    "5" => Some("1/2"),
    "25" => Some("1/4"),
    "75" => Some("3/4"),
    _ => {
      if digits.len() >= 2 && digits.chars().all(|c| c == '3') {
        Some("1/3")
      } else if digits.len() >= 2 && digits.chars().all(|c| c == '6') {
        Some("2/3")
      } else {
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn half_and_latex_half_collide() {
    assert_eq!(normalize_math("0.5"), normalize_math("1/2"));
    assert_eq!(normalize_math("\\frac{1}{2}"), "(1)/(2)");
    assert_eq!(normalize_math("0.5"), "1/2");
  }

  #[test]
  fn sizing_directives_are_stripped() {
    assert_eq!(
      normalize_math("\\left( x \\right)"),
      normalize_math("( x )")
    );
  }

  #[test]
  fn nested_braces_survive_frac_rewrite() {
    assert_eq!(normalize_math("\\frac{x^{2}}{3}"), "(x^{2})/(3)");
  }

  #[test]
  fn repeating_decimals_fold_to_thirds() {
    assert_eq!(normalize_math("0.333"), "1/3");
    assert_eq!(normalize_math("0.33"), "1/3");
    assert_eq!(normalize_math("0.6666"), "2/3");
    // Single "0.3" is not treated as repeating.
    assert_eq!(normalize_math("0.3"), "0.3");
  }

  #[test]
  fn digit_boundaries_block_decimal_rewrites() {
    assert_eq!(normalize_math("10.5"), "10.5");
    assert_eq!(normalize_math("0.55"), "0.55");
    assert_eq!(normalize_math("x=0.5"), "x=1/2");
  }

  #[test]
  fn exponent_braces_stay_significant() {
    assert_ne!(normalize_math("e^{x+1}"), normalize_math("e^x+1"));
  }

  #[test]
  fn whitespace_and_case_are_ignored(){
    assert_eq!(normalize_math(" X + 1 "), normalize_math("x+1"));
  }
}
