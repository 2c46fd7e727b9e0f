//! Tolerant answer comparison for free-text trivia answers.
//!
//! Exact string equality is too strict for answers typed under time pressure,
//! so matching runs a short-circuiting pipeline: exact match, ASCII
//! transliteration, inflectional suffix stripping, phonetic folding, partial
//! word match, and finally an edit-distance similarity threshold.

/// Similarity ratio above which two strings count as the same answer.
const SIMILARITY_THRESHOLD: f64 = 0.9;
/// Minimum length for the shorter side of a partial match.
const MIN_PARTIAL_LEN: usize = 4;
/// Minimum share of the longer side a partial prefix must cover (per mille).
const MIN_PREFIX_COVERAGE_PCT: usize = 70;

/// Common Turkish inflectional suffixes, longest first so the longest match
/// strips. Entries are in transliterated form.
const SUFFIXES: [&str; 20] = [
    "ler", "lar", "den", "dan", "ten", "tan", "mek", "mak", "de", "da", "te", "ta", "ye", "ya",
    "im", "um", "e", "a", "i", "u",
];

/// Alternate spellings folded before phonetic classing.
const ALTERNATE_SPELLINGS: [(&str, &str); 3] = [("ph", "f"), ("sh", "s"), ("x", "ks")];

/// Whether `answer` matches any comma-separated alternative of `reference`.
pub fn matches_any(answer: &str, reference: &str) -> bool {
    reference
        .split(',')
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
        .any(|alt| is_match(answer, alt))
}

/// Whether a raw answer matches one reference answer.
pub fn is_match(answer: &str, reference: &str) -> bool {
    let answer = fold_case(answer);
    let reference = fold_case(reference);
    if answer.is_empty() || reference.is_empty() {
        return false;
    }

    if answer == reference {
        return true;
    }

    let answer_ascii = transliterate(&answer);
    let reference_ascii = transliterate(&reference);
    if answer_ascii == reference_ascii {
        return true;
    }

    if strip_suffix_once(&answer_ascii) == strip_suffix_once(&reference_ascii) {
        return true;
    }

    if phonetic_match(&answer_ascii, &reference_ascii) {
        return true;
    }

    if partial_match(&answer_ascii, &reference_ascii) {
        return true;
    }

    similarity(&answer_ascii, &reference_ascii) > SIMILARITY_THRESHOLD
}

/// Locale-aware case fold: dotted/dotless I map the Turkish way before the
/// generic lowercase pass, and any leftover combining dot is dropped.
fn fold_case(input: &str) -> String {
    input
        .trim()
        .chars()
        .flat_map(|c| match c {
            'İ' => vec!['i'],
            'I' => vec!['ı'],
            other => other.to_lowercase().collect(),
        })
        .filter(|&c| c != '\u{0307}')
        .collect()
}

/// Fold diacritic letters to their plain ASCII equivalents.
fn transliterate(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'ç' => 'c',
            'ğ' => 'g',
            'ı' | 'î' => 'i',
            'ö' => 'o',
            'ş' => 's',
            'ü' | 'û' => 'u',
            'â' => 'a',
            'é' | 'è' | 'ê' => 'e',
            other => other,
        })
        .collect()
}

/// Remove at most one matched inflectional suffix, keeping a stem of at least
/// two characters.
fn strip_suffix_once(input: &str) -> &str {
    for suffix in SUFFIXES {
        if let Some(stem) = input.strip_suffix(suffix) {
            if stem.chars().count() >= 2 {
                return stem;
            }
        }
    }
    input
}

/// Map acoustically confusable letters onto one representative per class and
/// fold known alternate spellings.
fn phonetic_fold(input: &str) -> String {
    let mut folded = input.to_string();
    for (from, to) in ALTERNATE_SPELLINGS {
        folded = folded.replace(from, to);
    }
    folded
        .chars()
        .map(|c| match c {
            'p' => 'b',
            'j' => 'c',
            't' => 'd',
            'k' | 'q' => 'g',
            'w' => 'v',
            other => other,
        })
        .collect()
}

/// Collapse doubled letters ("kk" -> "k").
fn collapse_doubles(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last = None;
    for c in input.chars() {
        if last != Some(c) {
            out.push(c);
        }
        last = Some(c);
    }
    out
}

/// Phonetic stage: folded forms match exactly or after double-letter collapse.
fn phonetic_match(a: &str, b: &str) -> bool {
    let fa = phonetic_fold(a);
    let fb = phonetic_fold(b);
    fa == fb || collapse_doubles(&fa) == collapse_doubles(&fb)
}

/// Partial stage: the shorter side is a whole leading or trailing word
/// sequence of the longer, or a prefix of it covering most of its length once
/// suffixes and doubled letters are out of the way.
fn partial_match(a: &str, b: &str) -> bool {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    if short.chars().count() < MIN_PARTIAL_LEN {
        return false;
    }

    let short_words: Vec<&str> = short.split_whitespace().collect();
    let long_words: Vec<&str> = long.split_whitespace().collect();
    if !short_words.is_empty() && short_words.len() <= long_words.len() {
        if long_words[..short_words.len()] == short_words[..]
            || long_words[long_words.len() - short_words.len()..] == short_words[..]
        {
            return true;
        }
    }

    let short_stem = collapse_doubles(strip_suffix_once(short));
    let long_stem = collapse_doubles(strip_suffix_once(long));
    let (short_stem, long_stem) = if short_stem.len() <= long_stem.len() {
        (short_stem, long_stem)
    } else {
        (long_stem, short_stem)
    };
    short_stem.chars().count() >= MIN_PARTIAL_LEN
        && long_stem.starts_with(&short_stem)
        && short_stem.chars().count() * 100 >= long_stem.chars().count() * MIN_PREFIX_COVERAGE_PCT
}

/// Similarity ratio `1 - distance / max_len` over characters.
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Classic two-row Levenshtein distance over characters.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}
