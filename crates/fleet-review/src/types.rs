use fleet_core::types::{PrStatus, RepoIdentity};
use serde::{Deserialize, Serialize};

use crate::error::ReviewError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchedRepository {
    pub name_with_owner: String,
    #[serde(default)]
    pub name: String,
}

/// One row of `gh search prs --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchedPr {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub repository: SearchedRepository,
    #[serde(default)]
    pub state: Option<String>,
}

impl SearchedPr {
    pub fn identity(&self) -> Option<RepoIdentity> {
        RepoIdentity::parse_full_name(&self.repository.name_with_owner)
    }

    /// Web URL of the repository the request targets, e.g.
    /// `https://github.com/org/app` for `https://github.com/org/app/pull/7`.
    pub fn repo_url(&self) -> String {
        match self.url.split_once("/pull/") {
            Some((repo_url, _)) => repo_url.to_string(),
            None => format!("https://github.com/{}", self.repository.name_with_owner),
        }
    }
}

/// `gh pr view --json` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewedPr {
    #[serde(default)]
    pub number: u64,
    pub head_ref_name: String,
    pub state: String,
    #[serde(default)]
    pub url: String,
}

impl ViewedPr {
    pub fn is_open(&self) -> bool {
        self.state.eq_ignore_ascii_case("open")
    }
}

/// One row of `gh pr list --json state,number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedPr {
    pub number: u64,
    pub state: String,
}

impl ListedPr {
    pub fn status(&self) -> PrStatus {
        let number = self.number;
        match self.state.to_ascii_uppercase().as_str() {
            "OPEN" => PrStatus::Open { number },
            "MERGED" => PrStatus::Merged { number },
            "CLOSED" => PrStatus::Closed { number },
            _ => PrStatus::Unknown,
        }
    }
}

pub fn parse_search_output(raw: &str) -> Result<Vec<SearchedPr>, ReviewError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|source| ReviewError::Json {
        context: "gh search prs output".to_string(),
        source,
    })
}

pub fn parse_view_output(raw: &str) -> Result<ViewedPr, ReviewError> {
    serde_json::from_str(raw).map_err(|source| ReviewError::Json {
        context: "gh pr view output".to_string(),
        source,
    })
}

/// Status of the first listed pull request, `NoPr` when there is none.
pub fn parse_pr_list_output(raw: &str) -> Result<PrStatus, ReviewError> {
    if raw.trim().is_empty() {
        return Ok(PrStatus::NoPr);
    }
    let rows: Vec<ListedPr> = serde_json::from_str(raw).map_err(|source| ReviewError::Json {
        context: "gh pr list output".to_string(),
        source,
    })?;
    Ok(rows.first().map_or(PrStatus::NoPr, ListedPr::status))
}

#[cfg(test)]
mod tests {
    use fleet_core::types::{PrStatus, RepoIdentity};

    use super::{parse_pr_list_output, parse_search_output, parse_view_output};
    use crate::error::ReviewError;

    #[test]
    fn parses_search_rows() {
        let raw = r#"[
          {"number": 42, "title": "Fix the bug", "url": "https://github.com/org/app/pull/42",
           "repository": {"name": "app", "nameWithOwner": "org/app"}, "state": "open"},
          {"number": 7, "title": "Docs", "url": "https://github.com/org/docs/pull/7",
           "repository": {"nameWithOwner": "org/docs"}}
        ]"#;
        let rows = parse_search_output(raw).expect("parse");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].identity(), Some(RepoIdentity::new("org", "app")));
        assert_eq!(rows[0].repo_url(), "https://github.com/org/app");
        assert_eq!(rows[1].state, None);
        assert!(parse_search_output("  \n").expect("empty").is_empty());
    }

    #[test]
    fn parses_view_state() {
        let viewed = parse_view_output(
            r#"{"number": 42, "headRefName": "fix/bug-123", "state": "OPEN", "url": "u"}"#,
        )
        .expect("parse");
        assert_eq!(viewed.head_ref_name, "fix/bug-123");
        assert!(viewed.is_open());

        let err = parse_view_output("not json").expect_err("garbage");
        assert!(matches!(err, ReviewError::Json { .. }));
    }

    #[test]
    fn pr_list_maps_first_row_state() {
        assert_eq!(
            parse_pr_list_output(r#"[{"state": "MERGED", "number": 12}]"#).expect("parse"),
            PrStatus::Merged { number: 12 }
        );
        assert_eq!(parse_pr_list_output("[]").expect("empty list"), PrStatus::NoPr);
        assert_eq!(parse_pr_list_output("").expect("no output"), PrStatus::NoPr);
        assert_eq!(
            parse_pr_list_output(r#"[{"state": "DRAFT", "number": 3}]"#).expect("parse"),
            PrStatus::Unknown
        );
        assert!(parse_pr_list_output("{").is_err());
    }
}
