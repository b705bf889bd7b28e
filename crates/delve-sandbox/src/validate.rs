use delve_types::{AnalysisKind, CodeArtifact};

/// Reasons the code validator can reject generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Empty,
    CommentsOnly,
    NoCodeIndicators,
    SyntaxError,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Empty => write!(f, "text is empty or whitespace"),
            ValidationError::CommentsOnly => write!(f, "only comments and blank lines remain"),
            ValidationError::NoCodeIndicators => {
                write!(f, "no executable-code indicators found")
            }
            ValidationError::SyntaxError => write!(f, "text does not parse as python"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Decide whether generated text is genuinely executable code. On success the
/// returned artifact carries the fence-stripped text with `validated` set, so
/// re-validating an accepted artifact is a no-op.
pub fn validate_code(text: &str) -> Result<CodeArtifact, ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::Empty);
    }

    let stripped = strip_code_fences(text);

    let meaningful: Vec<&str> = stripped
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();
    if meaningful.is_empty() {
        return Err(ValidationError::CommentsOnly);
    }

    if !meaningful.iter().any(|line| has_code_indicator(line)) {
        return Err(ValidationError::NoCodeIndicators);
    }

    // Syntax-only parse. A tree containing error nodes rejects; failure to
    // construct the parser at all does not (asymmetric leniency: only a
    // positive syntax diagnosis disqualifies).
    if let Some(has_error) = parse_has_syntax_error(&stripped) {
        if has_error {
            return Err(ValidationError::SyntaxError);
        }
    }

    let mut artifact = CodeArtifact::new(stripped.clone(), classify_analysis_kind(&stripped));
    artifact.validated = true;
    Ok(artifact)
}

/// Remove surrounding markdown code fences, including an optional language
/// tag on the opening fence. Text without fences passes through untouched.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.contains("```") {
        return trimmed.to_string();
    }

    let mut inside = false;
    let mut out: Vec<&str> = Vec::new();
    for line in trimmed.lines() {
        let lt = line.trim_start();
        if lt.starts_with("```") {
            inside = !inside;
            continue;
        }
        if inside {
            out.push(line);
        }
    }

    // Fences present but unbalanced or empty: fall back to dropping just the
    // fence lines.
    if out.iter().all(|l| l.trim().is_empty()) {
        return trimmed
            .lines()
            .filter(|l| !l.trim_start().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();
    }
    out.join("\n").trim().to_string()
}

const LINE_START_KEYWORDS: [&str; 11] = [
    "import ", "from ", "def ", "class ", "for ", "while ", "if ", "elif ", "return", "with ",
    "try:",
];

const LIBRARY_TOKENS: [&str; 8] = [
    "pd.", "np.", "plt.", "sns.", "pandas", "numpy", "matplotlib", "seaborn",
];

fn has_code_indicator(line: &str) -> bool {
    if LINE_START_KEYWORDS.iter().any(|kw| line.starts_with(kw)) {
        return true;
    }
    if line.contains("print(") {
        return true;
    }
    if LIBRARY_TOKENS.iter().any(|t| line.contains(t)) {
        return true;
    }
    has_assignment(line)
}

/// A bare `=` that is not part of a comparison operator. Approximate by
/// design; the syntax parse is the stronger gate behind it.
fn has_assignment(line: &str) -> bool {
    let bytes = line.as_bytes();
    for (idx, b) in bytes.iter().enumerate() {
        if *b != b'=' {
            continue;
        }
        let prev = idx.checked_sub(1).map(|i| bytes[i]);
        let next = bytes.get(idx + 1).copied();
        let comparison = matches!(prev, Some(b'=') | Some(b'!') | Some(b'<') | Some(b'>'))
            || matches!(next, Some(b'='));
        if !comparison {
            return true;
        }
    }
    false
}

/// `Some(true)` when the parse tree contains syntax errors, `Some(false)` when
/// it parses cleanly, `None` when no parse could be attempted.
fn parse_has_syntax_error(code: &str) -> Option<bool> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .ok()?;
    let tree = parser.parse(code, None)?;
    Some(tree.root_node().has_error())
}

/// Keyword classification of what the generated code is doing, restored from
/// the upstream analysis detection.
pub fn classify_analysis_kind(code: &str) -> AnalysisKind {
    let lower = code.to_lowercase();
    if ["plt.", "plot(", "figure(", "chart", "seaborn", "sns."]
        .iter()
        .any(|t| lower.contains(t))
    {
        AnalysisKind::Visualization
    } else if ["mean(", "median(", "std(", "corr(", "regression", "percentile"]
        .iter()
        .any(|t| lower.contains(t))
    {
        AnalysisKind::Statistical
    } else if ["dataframe", "pd.", "groupby", "merge(", "pivot"]
        .iter()
        .any(|t| lower.contains(t))
    {
        AnalysisKind::DataProcessing
    } else if ["sum(", "round(", "math.", "total", "+", "*"]
        .iter()
        .any(|t| lower.contains(t))
    {
        AnalysisKind::Calculation
    } else {
        AnalysisKind::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_rejected() {
        assert_eq!(validate_code("").unwrap_err(), ValidationError::Empty);
        assert_eq!(validate_code("   \n  ").unwrap_err(), ValidationError::Empty);
    }

    #[test]
    fn comment_only_text_is_rejected() {
        assert_eq!(
            validate_code("# just a comment").unwrap_err(),
            ValidationError::CommentsOnly
        );
        assert_eq!(
            validate_code("# one\n\n# two\n").unwrap_err(),
            ValidationError::CommentsOnly
        );
    }

    #[test]
    fn real_code_is_accepted() {
        let artifact = validate_code("import pandas as pd\nprint(1)").expect("accepted");
        assert!(artifact.validated);
        assert_eq!(artifact.text, "import pandas as pd\nprint(1)");
    }

    #[test]
    fn syntax_error_is_rejected() {
        assert_eq!(
            validate_code("def f(:").unwrap_err(),
            ValidationError::SyntaxError
        );
    }

    #[test]
    fn prose_without_indicators_is_rejected() {
        assert_eq!(
            validate_code("This is just text explaining concepts").unwrap_err(),
            ValidationError::NoCodeIndicators
        );
    }

    #[test]
    fn prose_with_stray_equals_fails_the_parse() {
        // Indicator heuristic passes on the `=`, the syntax gate catches it.
        let text = "The importance of x = y in economics cannot be overstated";
        assert_eq!(
            validate_code(text).unwrap_err(),
            ValidationError::SyntaxError
        );
    }

    #[test]
    fn fences_are_stripped_before_validation() {
        let fenced = "```python\nx = 5 + 3\nprint(x)\n```";
        let artifact = validate_code(fenced).expect("accepted");
        assert_eq!(artifact.text, "x = 5 + 3\nprint(x)");
    }

    #[test]
    fn validation_is_idempotent_on_accepted_output() {
        let first = validate_code("import numpy as np\nx = np.arange(3)").expect("accepted");
        let second = validate_code(&first.text).expect("accepted again");
        assert_eq!(first.text, second.text);
    }

    #[test]
    fn comparison_operators_are_not_assignments() {
        assert!(!has_assignment("a == b or a != b or a <= b"));
        assert!(has_assignment("total = 3"));
    }

    #[test]
    fn analysis_kind_prefers_visualization() {
        assert_eq!(
            classify_analysis_kind("import matplotlib.pyplot as plt\nplt.plot([1])"),
            AnalysisKind::Visualization
        );
        assert_eq!(
            classify_analysis_kind("df = pd.DataFrame(data)\ndf.groupby('a')"),
            AnalysisKind::DataProcessing
        );
    }
}
