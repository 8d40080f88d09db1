/// One term of a phrase with its offset from the first term, in token
/// positions. Stop words between phrase terms keep their slot, so
/// `"state of the art"` gives `state@0, art@3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseTerm {
    pub term: String,
    pub offset: u32,
}

/// Parsed query. Terms are already normalized by the tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Term(String),
    /// Terms that must appear at the given relative positions.
    Phrase(Vec<PhraseTerm>),
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    /// Restricts matches to a host and its subdomains.
    Site(String),
}

impl Query {
    /// Every term mentioned anywhere in the query, first occurrence order.
    pub fn terms(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_terms(true, &mut out);
        out
    }

    /// Terms outside any negation. These are the terms that score.
    pub fn positive_terms(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_terms(false, &mut out);
        out
    }

    fn collect_terms(&self, include_negated: bool, out: &mut Vec<String>) {
        fn push(t: &str, out: &mut Vec<String>) {
            if !out.iter().any(|seen| seen == t) {
                out.push(t.to_string());
            }
        }
        match self {
            Query::Term(t) => push(t, out),
            Query::Phrase(terms) => {
                for pt in terms {
                    push(&pt.term, out);
                }
            }
            Query::And(children) | Query::Or(children) => {
                for child in children {
                    child.collect_terms(include_negated, out);
                }
            }
            Query::Not(inner) => {
                if include_negated {
                    inner.collect_terms(include_negated, out);
                }
            }
            Query::Site(_) => {}
        }
    }
}
