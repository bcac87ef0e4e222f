use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::git::Git;
use crate::types::{BranchInfo, RawStatusEntry, RenameDetails, StatusFacets};

/// Arguments of the status query parsed by [`parse_porcelain_v2`].
pub const STATUS_ARGS: [&str; 5] = [
    "status",
    "--porcelain=v2",
    "--branch",
    "-z",
    "--untracked-files=all",
];

/// Parsed output of one status query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub branch: Option<BranchInfo>,
    pub entries: Vec<RawStatusEntry>,
}

/// Runs the status query against the repository.
///
/// # Errors
///
/// Returns [`Error::InvalidRepository`] if git fails or reports no branch,
/// and [`Error::LaunchFailure`] if git cannot be started
#[instrument(skip(git), fields(repo_path = %git.repo_path().display()))]
pub fn collect(git: &impl Git) -> Result<StatusReport> {
    let output = git.run_git_command_raw(&STATUS_ARGS).map_err(|e| match e {
        Error::GitCommandError(message) => Error::InvalidRepository(message.trim().to_string()),
        other => other,
    })?;
    let report = parse_porcelain_v2(&output)?;
    if report.branch.is_none() {
        return Err(Error::InvalidRepository(
            "status output has no branch header".to_string(),
        ));
    }
    debug!(entries = report.entries.len(), "Status collected");
    Ok(report)
}

/// Parses `git status --porcelain=v2 --branch -z` output.
///
/// # Errors
///
/// Returns [`Error::StatusParseError`] on unknown record kinds or malformed records
pub fn parse_porcelain_v2(output: &str) -> Result<StatusReport> {
    let mut report = StatusReport::default();
    let mut branch: Option<BranchInfo> = None;
    let mut records = output.split('\0').filter(|record| !record.is_empty());

    while let Some(record) = records.next() {
        let (kind, rest) = record.split_once(' ').unwrap_or((record, ""));
        match kind {
            "#" => parse_header(rest, &mut branch),
            "1" => {
                let fields = split_fields(rest, 8, record)?;
                let facets = facets_from_xy(fields[0], None, record)?;
                report.entries.push(RawStatusEntry::new(fields[7], facets));
            }
            "2" => {
                let fields = split_fields(rest, 9, record)?;
                let similarity = parse_score(fields[7], record)?;
                let facets = facets_from_xy(fields[0], Some(similarity), record)?;
                let old_path = records
                    .next()
                    .ok_or_else(|| malformed("rename without original path", record))?;
                let mut entry = RawStatusEntry::new(fields[8], facets);
                if facets.contains(StatusFacets::RENAMED_IN_INDEX) {
                    entry.rename = Some(RenameDetails {
                        old_path: old_path.to_string(),
                        new_path: fields[8].to_string(),
                        similarity,
                    });
                }
                report.entries.push(entry);
            }
            "u" => {
                let fields = split_fields(rest, 10, record)?;
                report
                    .entries
                    .push(RawStatusEntry::new(fields[9], StatusFacets::CONFLICTED));
            }
            "?" => report
                .entries
                .push(RawStatusEntry::new(rest, StatusFacets::UNTRACKED)),
            "!" => report
                .entries
                .push(RawStatusEntry::new(rest, StatusFacets::IGNORED)),
            _ => return Err(malformed("unknown record kind", record)),
        }
    }

    report.branch = branch;
    Ok(report)
}

fn parse_header(header: &str, branch: &mut Option<BranchInfo>) {
    let (key, value) = header.split_once(' ').unwrap_or((header, ""));
    match key {
        "branch.head" => branch.get_or_insert_with(BranchInfo::default).head = value.to_string(),
        "branch.upstream" => {
            branch.get_or_insert_with(BranchInfo::default).upstream = Some(value.to_string());
        }
        "branch.ab" => {
            let info = branch.get_or_insert_with(BranchInfo::default);
            for count in value.split_whitespace() {
                if let Some(ahead) = count.strip_prefix('+') {
                    info.ahead = ahead.parse().unwrap_or(0);
                } else if let Some(behind) = count.strip_prefix('-') {
                    info.behind = behind.parse().unwrap_or(0);
                }
            }
        }
        _ => {}
    }
}

/// Splits a record body into `count` space-separated fields; the last one is
/// the path and may itself contain spaces.
fn split_fields<'a>(rest: &'a str, count: usize, record: &str) -> Result<Vec<&'a str>> {
    let fields: Vec<&str> = rest.splitn(count, ' ').collect();
    if fields.len() != count || fields[count - 1].is_empty() {
        return Err(malformed("too few fields", record));
    }
    Ok(fields)
}

fn parse_score(field: &str, record: &str) -> Result<u8> {
    let digits = field
        .strip_prefix('R')
        .or_else(|| field.strip_prefix('C'))
        .ok_or_else(|| malformed("bad rename score", record))?;
    digits
        .parse::<u8>()
        .ok()
        .filter(|score| *score <= 100)
        .ok_or_else(|| malformed("bad rename score", record))
}

/// Maps an `XY` code to facets. Codes outside the known set become
/// [`StatusFacets::UNKNOWN`] so the entry is reported, not fatal.
fn facets_from_xy(xy: &str, similarity: Option<u8>, record: &str) -> Result<StatusFacets> {
    let mut codes = xy.chars();
    let (Some(x), Some(y), None) = (codes.next(), codes.next(), codes.next()) else {
        return Err(malformed("bad XY code", record));
    };

    let mut facets = match x {
        '.' => StatusFacets::empty(),
        'M' | 'T' => StatusFacets::STAGED,
        'A' | 'C' => StatusFacets::ADDED,
        'D' => StatusFacets::REMOVED,
        'R' if similarity.unwrap_or(100) < 100 => {
            StatusFacets::RENAMED_IN_INDEX | StatusFacets::STAGED
        }
        'R' => StatusFacets::RENAMED_IN_INDEX,
        _ => StatusFacets::UNKNOWN,
    };
    facets |= match y {
        '.' => StatusFacets::empty(),
        'M' | 'T' => StatusFacets::MODIFIED,
        'D' => StatusFacets::MISSING,
        // Intent-to-add paths, also when paired with a deleted source.
        'A' | 'R' | 'C' => StatusFacets::UNTRACKED,
        _ => StatusFacets::UNKNOWN,
    };
    if facets.contains(StatusFacets::UNKNOWN) {
        debug!(xy, "Unknown status code");
    }
    Ok(facets)
}

fn malformed(reason: &str, record: &str) -> Error {
    Error::StatusParseError(format!("{reason}: {record:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADERS: &str = "# branch.oid 1234abcd\0# branch.head main\0# branch.upstream origin/main\0# branch.ab +2 -1\0";

    #[test]
    fn test_parses_branch_headers() {
        let report = parse_porcelain_v2(HEADERS).unwrap();
        let branch = report.branch.unwrap();
        assert_eq!(branch.head, "main");
        assert_eq!(branch.upstream.as_deref(), Some("origin/main"));
        assert_eq!((branch.ahead, branch.behind), (2, 1));
        assert!(report.entries.is_empty());
    }

    #[test]
    fn test_parses_ordinary_untracked_and_ignored() {
        let output = format!(
            "{HEADERS}1 .M N... 100644 100644 100644 aaaa bbbb src/main.rs\0\
             1 MM N... 100644 100644 100644 aaaa bbbb with space.txt\0\
             1 A. N... 000000 100644 100644 0000 bbbb new.txt\0\
             1 D. N... 100644 000000 000000 aaaa 0000 old.txt\0\
             1 .D N... 100644 100644 000000 aaaa aaaa gone.txt\0\
             ? notes.md\0\
             ! target/\0"
        );
        let report = parse_porcelain_v2(&output).unwrap();
        let got: Vec<(&str, StatusFacets)> = report
            .entries
            .iter()
            .map(|e| (e.path.as_str(), e.facets))
            .collect();
        assert_eq!(
            got,
            vec![
                ("src/main.rs", StatusFacets::MODIFIED),
                ("with space.txt", StatusFacets::STAGED | StatusFacets::MODIFIED),
                ("new.txt", StatusFacets::ADDED),
                ("old.txt", StatusFacets::REMOVED),
                ("gone.txt", StatusFacets::MISSING),
                ("notes.md", StatusFacets::UNTRACKED),
                ("target/", StatusFacets::IGNORED),
            ]
        );
    }

    #[test]
    fn test_parses_rename_with_similarity() {
        let output = format!(
            "{HEADERS}2 R. N... 100644 100644 100644 aaaa aaaa R87 b.txt\0a.txt\0\
             2 R. N... 100644 100644 100644 aaaa aaaa R100 d.txt\0c.txt\0"
        );
        let report = parse_porcelain_v2(&output).unwrap();

        let partial = &report.entries[0];
        assert_eq!(partial.path, "b.txt");
        assert_eq!(
            partial.facets,
            StatusFacets::RENAMED_IN_INDEX | StatusFacets::STAGED
        );
        assert_eq!(
            partial.rename,
            Some(RenameDetails {
                old_path: "a.txt".to_string(),
                new_path: "b.txt".to_string(),
                similarity: 87,
            })
        );

        let exact = &report.entries[1];
        assert_eq!(exact.facets, StatusFacets::RENAMED_IN_INDEX);
        assert_eq!(exact.rename.as_ref().map(|r| r.similarity), Some(100));
    }

    #[test]
    fn test_copy_is_added_without_rename_details() {
        let output = "2 C. N... 100644 100644 100644 aaaa aaaa C75 copy.txt\0orig.txt\0";
        let report = parse_porcelain_v2(output).unwrap();
        assert_eq!(report.entries[0].facets, StatusFacets::ADDED);
        assert_eq!(report.entries[0].rename, None);
    }

    #[test]
    fn test_unmerged_is_conflicted() {
        let output = "u UU N... 100644 100644 100644 100644 aaaa bbbb cccc both.txt\0";
        let report = parse_porcelain_v2(output).unwrap();
        assert_eq!(report.entries[0].path, "both.txt");
        assert_eq!(report.entries[0].facets, StatusFacets::CONFLICTED);
    }

    #[test]
    fn test_rejects_malformed_records() {
        for output in [
            "1 .M N... 100644\0",
            "2 R. N... 100644 100644 100644 aaaa aaaa R87 b.txt\0",
            "2 R. N... 100644 100644 100644 aaaa aaaa X87 b.txt\0a.txt\0",
            "1 .MX N... 100644 100644 100644 aaaa bbbb f.txt\0",
            "z something\0",
        ] {
            assert!(
                matches!(
                    parse_porcelain_v2(output),
                    Err(Error::StatusParseError(_))
                ),
                "expected parse error for {output:?}"
            );
        }
    }

    #[test]
    fn test_worktree_rename_of_intent_to_add_path() {
        let output = format!(
            "{HEADERS}2 .R N... 100644 100644 100644 aaaa aaaa R100 b.txt\0a.txt\0\
             1 .M N... 100644 100644 100644 aaaa bbbb other.txt\0"
        );
        let report = parse_porcelain_v2(&output).unwrap();
        assert_eq!(report.entries[0].path, "b.txt");
        assert_eq!(report.entries[0].facets, StatusFacets::UNTRACKED);
        assert_eq!(report.entries[0].rename, None);
        assert_eq!(report.entries[1].facets, StatusFacets::MODIFIED);
    }

    #[test]
    fn test_unknown_codes_are_kept_as_entries() {
        let output = format!(
            "{HEADERS}1 .Z N... 100644 100644 100644 aaaa bbbb odd.txt\0\
             1 QM N... 100644 100644 100644 aaaa bbbb odder.txt\0\
             1 M. N... 100644 100644 100644 aaaa bbbb fine.txt\0"
        );
        let report = parse_porcelain_v2(&output).unwrap();
        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.entries[0].facets, StatusFacets::UNKNOWN);
        assert_eq!(
            report.entries[1].facets,
            StatusFacets::UNKNOWN | StatusFacets::MODIFIED
        );
        assert_eq!(report.entries[2].facets, StatusFacets::STAGED);
    }

    #[test]
    fn test_empty_output() {
        assert_eq!(parse_porcelain_v2("").unwrap(), StatusReport::default());
    }
}
