use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::request::InputError;

/// Upper bound on candidates requested from the search provider.
pub const MAX_SEARCH_RESULTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    subject: String,
    exclusions: Vec<String>,
}

impl SearchQuery {
    pub fn new(subject: &str) -> Result<Self, InputError> {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(InputError::new("subject", "search query must not be empty"));
        }
        Ok(Self {
            subject: subject.to_string(),
            exclusions: Vec::new(),
        })
    }

    pub fn excluding<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.exclusions.extend(
            terms
                .into_iter()
                .map(|term| term.as_ref().trim().to_string())
                .filter(|term| !term.is_empty()),
        );
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn exclusions(&self) -> &[String] {
        &self.exclusions
    }

    /// Provider query text: the subject followed by `-term` for each exclusion.
    pub fn to_query_string(&self) -> String {
        let mut query = self.subject.clone();
        for term in &self.exclusions {
            let quoted = if term.contains(char::is_whitespace) {
                format!("\"{term}\"")
            } else {
                term.clone()
            };
            query.push_str(" -");
            query.push_str(&quoted);
        }
        query
    }
}

/// A search hit that has not been downloaded yet. `rank` is 0 for the most
/// relevant hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub url: String,
    pub source_title: String,
    pub rank: usize,
}

/// A downloaded, validated reference image. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedReference {
    pub candidate: Candidate,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub local_path: PathBuf,
}

impl FetchedReference {
    pub fn rank(&self) -> usize {
        self.candidate.rank
    }

    pub fn sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{Candidate, FetchedReference, SearchQuery};

    #[test]
    fn query_string_appends_exclusions() {
        let query = SearchQuery::new("  steel pipe bracket ")
            .unwrap()
            .excluding(["cartoon", "", "stock photo"]);
        assert_eq!(query.subject(), "steel pipe bracket");
        assert_eq!(
            query.to_query_string(),
            "steel pipe bracket -cartoon -\"stock photo\""
        );
    }

    #[test]
    fn empty_query_is_rejected() {
        assert_eq!(SearchQuery::new(" ").unwrap_err().field, "subject");
    }

    #[test]
    fn reference_digest_is_stable() {
        let reference = FetchedReference {
            candidate: Candidate {
                url: "https://example.com/a.png".to_string(),
                source_title: "a".to_string(),
                rank: 2,
            },
            bytes: b"abc".to_vec(),
            content_type: "image/png".to_string(),
            local_path: PathBuf::from("a.png"),
        };
        assert_eq!(reference.rank(), 2);
        assert_eq!(
            reference.sha256(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
