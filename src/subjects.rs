//! Canonical subject table: aliases, exam-style generation rules, and
//! relevance keywords, plus the fuzzy subject/topic normalizer.
//!
//! Flow:
//! 1) Free-text subject strings are normalized to a canonical name
//!    (exact alias match, then Levenshtein distance <= 3).
//! 2) The canonical name keys into a static rule table used for prompt
//!    construction and the soft relevance check.
//! Unrecognized subjects keep their original spelling and fall back to the
//! generic rule set.

/// Accept a fuzzy match only within this many edits of a canonical name.
const MAX_EDIT_DISTANCE: usize = 3;

pub struct SubjectDef {
  pub canonical: &'static str,
  pub aliases: &'static [&'static str],
  /// Exam-style generation rules injected into the prompt for this subject.
  pub rules: &'static str,
  /// Keywords for the soft relevance check (log-only, never rejects).
  pub keywords: &'static [&'static str],
}

const SUBJECTS: &[SubjectDef] = &[
  SubjectDef {
    canonical: "Mathematics",
    aliases: &["math", "maths", "mathematics", "further maths", "further mathematics"],
    rules: "Write all mathematical expressions in LaTeX wrapped in $...$ delimiters. \
Distractors must reflect common student errors (sign slips, off-by-one, wrong operation), \
not arbitrary numbers. Every question must be solvable from the stem alone.",
    keywords: &[
      "equation", "solve", "calculate", "value", "number", "fraction", "graph",
      "function", "angle", "area", "sum", "product", "simplify", "expression",
    ],
  },
  SubjectDef {
    canonical: "English Language",
    aliases: &["english", "english language", "use of english", "eng"],
    rules: "Test grammar, lexis, comprehension-free usage, and register. Options must be \
plausible near-misses (wrong tense, wrong preposition), never obviously broken English.",
    keywords: &[
      "sentence", "word", "grammar", "meaning", "opposite", "synonym", "antonym",
      "phrase", "tense", "speech", "vowel", "stress",
    ],
  },
  SubjectDef {
    canonical: "Physics",
    aliases: &["physics", "phys"],
    rules: "Write formulas and units in LaTeX wrapped in $...$ delimiters. Use SI units \
consistently. Numeric distractors should come from unit slips or formula misuse.",
    keywords: &[
      "force", "energy", "velocity", "acceleration", "mass", "charge", "current",
      "wave", "field", "motion", "power", "momentum", "temperature",
    ],
  },
  SubjectDef {
    canonical: "Chemistry",
    aliases: &["chemistry", "chem"],
    rules: "Write formulas in LaTeX wrapped in $...$ delimiters and balance all equations. \
Distractors should reflect wrong oxidation states, wrong stoichiometry, or confused species.",
    keywords: &[
      "element", "compound", "reaction", "acid", "base", "bond", "mole", "atom",
      "electron", "solution", "gas", "oxidation", "salt",
    ],
  },
  SubjectDef {
    canonical: "Biology",
    aliases: &["biology", "bio"],
    rules: "Prefer precise terminology over vague description. Distractors should name \
related but distinct structures or processes.",
    keywords: &[
      "cell", "organism", "gene", "enzyme", "tissue", "blood", "plant", "animal",
      "protein", "species", "respiration", "photosynthesis", "dna",
    ],
  },
  SubjectDef {
    canonical: "Economics",
    aliases: &["economics", "econs", "econ"],
    rules: "Test concepts and cause-effect reasoning, not memorized definitions verbatim. \
Distractors should invert or misattribute the causal direction.",
    keywords: &[
      "demand", "supply", "price", "market", "cost", "inflation", "tax", "trade",
      "income", "utility", "scarcity", "elasticity",
    ],
  },
  SubjectDef {
    canonical: "Government",
    aliases: &["government", "govt", "civic education", "civics"],
    rules: "Keep questions neutral and factual about institutions, constitutions and \
processes. Avoid partisan or region-ambiguous phrasing.",
    keywords: &[
      "constitution", "state", "power", "law", "election", "democracy", "legislature",
      "executive", "judiciary", "citizen", "rights",
    ],
  },
  SubjectDef {
    canonical: "Literature",
    aliases: &["literature", "literature in english", "lit"],
    rules: "Test literary devices, genres and interpretation skills in general terms. \
Only reference specific texts when they are named in the supplied content.",
    keywords: &[
      "poem", "novel", "character", "theme", "metaphor", "irony", "plot", "drama",
      "imagery", "narrator", "stanza", "satire",
    ],
  },
  SubjectDef {
    canonical: "Geography",
    aliases: &["geography", "geog"],
    rules: "Test physical and human geography concepts. Numeric distractors should be \
the right order of magnitude to stay plausible.",
    keywords: &[
      "climate", "river", "map", "population", "rock", "soil", "region", "latitude",
      "erosion", "settlement", "rainfall", "vegetation",
    ],
  },
  SubjectDef {
    canonical: "Computer Science",
    aliases: &["computer science", "computer studies", "computing", "cs", "ict"],
    rules: "Code snippets must be syntactically valid in the language they claim. \
Distractors should be outputs of plausible misreadings, not random values.",
    keywords: &[
      "algorithm", "program", "data", "memory", "binary", "loop", "variable",
      "network", "software", "hardware", "function", "bit",
    ],
  },
  SubjectDef {
    canonical: "Engineering",
    aliases: &["engineering", "basic technology", "technical drawing"],
    rules: "Write formulas and units in LaTeX wrapped in $...$ delimiters. Keep material \
properties and tolerances realistic.",
    keywords: &[
      "load", "stress", "strain", "material", "circuit", "torque", "beam", "gear",
      "design", "efficiency", "machine",
    ],
  },
];

/// Rules used when the subject does not resolve to a canonical entry.
const GENERIC_RULES: &str = "Questions must be self-contained and answerable without any \
external material. All four options must be plausible to a student who has not mastered \
the topic; exactly one must be correct.";

/// Look up the rule block for a (possibly already normalized) subject name.
pub fn rules_for(subject: &str) -> &'static str {
  let lower = subject.to_lowercase();
  SUBJECTS
    .iter()
    .find(|s| s.canonical.to_lowercase() == lower)
    .map(|s| s.rules)
    .unwrap_or(GENERIC_RULES)
}

/// Keyword list for the soft relevance check; empty for unknown subjects.
pub fn keywords_for(subject: &str) -> &'static [&'static str] {
  let lower = subject.to_lowercase();
  SUBJECTS
    .iter()
    .find(|s| s.canonical.to_lowercase() == lower)
    .map(|s| s.keywords)
    .unwrap_or(&[])
}

/// Map a free-text subject to its canonical name.
///
/// Exact alias match first, then minimum Levenshtein distance against the
/// canonical names (accepted only within `MAX_EDIT_DISTANCE`). Inputs that
/// match nothing are returned unchanged so the caller can still use them as
/// a lookup key. Blank input returns `None`.
pub fn normalize_subject(input: &str) -> Option<String> {
  let trimmed = input.trim();
  if trimmed.is_empty() {
    return None;
  }
  let lower = trimmed.to_lowercase();

  for def in SUBJECTS {
    if def.aliases.iter().any(|a| *a == lower) {
      return Some(def.canonical.to_string());
    }
  }

  let mut best: Option<(&'static str, usize)> = None;
  for def in SUBJECTS {
    let d = levenshtein(&lower, &def.canonical.to_lowercase());
    if best.map_or(true, |(_, bd)| d < bd) {
      best = Some((def.canonical, d));
    }
  }
  match best {
    Some((canonical, d)) if d <= MAX_EDIT_DISTANCE => Some(canonical.to_string()),
    _ => Some(trimmed.to_string()),
  }
}

/// Topics are free text matched downstream by substring, so no fuzzy step:
/// trim, collapse internal whitespace, lowercase. Blank input returns `None`.
pub fn normalize_topic(input: &str) -> Option<String> {
  let collapsed = crate::util::collapse_whitespace(input);
  if collapsed.is_empty() {
    None
  } else {
    Some(collapsed.to_lowercase())
  }
}

/// Classic two-row Levenshtein. Inputs here are short subject names.
fn levenshtein(a: &str, b: &str) -> usize {
  let a: Vec<char> = a.chars().collect();
  let b: Vec<char> = b.chars().collect();
  if a.is_empty() {
    return b.len();
  }
  if b.is_empty() {
    return a.len();
  }

  let mut prev: Vec<usize> = (0..=b.len()).collect();
  let mut curr = vec![0usize; b.len() + 1];
  for (i, ca) in a.iter().enumerate() {
    curr[0] = i + 1;
    for (j, cb) in b.iter().enumerate() {
      let cost = if ca == cb { 0 } else { 1 };
      curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
    }
    std::mem::swap(&mut prev, &mut curr);
  }
  prev[b.len()]
}
