//! Heuristics that turn raw search hits into job listings.

use hirewire_core::domain::job::{AppliedJob, JobListing};

/// Delimiters whose right-hand side is the company ("Engineer at Acme").
const COMPANY_RIGHT_DELIMITERS: [&str; 2] = [" at ", " @ "];
/// Delimiters splitting titles into segments ("Acme - Engineer", "Engineer | Acme").
const SEGMENT_DELIMITERS: [&str; 3] = [" | ", " – ", " - "];

const TITLE_KEYWORDS: &[&str] = &[
    "engineer",
    "engineering",
    "developer",
    "manager",
    "director",
    "designer",
    "analyst",
    "scientist",
    "intern",
    "internship",
    "senior",
    "junior",
    "principal",
    "specialist",
    "consultant",
    "architect",
    "coordinator",
    "administrator",
    "associate",
    "officer",
    "representative",
    "assistant",
    "technician",
    "remote",
    "hybrid",
    "full-time",
    "part-time",
    "contract",
];

const CAREER_LABELS: &[&str] = &[
    "careers",
    "career",
    "jobs",
    "job",
    "hiring",
    "apply",
    "openings",
    "opening",
    "vacancies",
    "vacancy",
    "positions",
    "position",
    "employment",
    "recruiting",
];

const CAREER_PHRASES: &[&str] = &["join us", "work with us", "job board", "open roles"];

/// Applicant-tracking hosts that put the employer in the first path segment.
const ATS_HOSTS: &[&str] = &["greenhouse.io", "lever.co", "ashbyhq.com", "workable.com"];

/// Second-level labels under a two-letter country code (`acme.co.uk`).
const SECOND_LEVEL_SUFFIXES: &[&str] = &["co", "com", "ac", "org", "net", "gov", "edu"];

const MAX_COMPANY_LEN: usize = 60;

pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Appends `-site:` operators for the first `max_exclusions` boards.
pub fn build_search_query(query: &str, job_boards: &[String], max_exclusions: usize) -> String {
    let exclusions = job_boards
        .iter()
        .take(max_exclusions)
        .map(|board| format!("-site:{board}"))
        .collect::<Vec<_>>();

    if exclusions.is_empty() {
        query.trim().to_string()
    } else {
        format!("{} {}", query.trim(), exclusions.join(" "))
    }
}

pub fn extract_listing(raw_title: &str, url: &str) -> Option<JobListing> {
    if let Some((company, title)) = split_company_and_title(raw_title) {
        return Some(JobListing { company, title, url: url.to_string() });
    }

    let company = company_from_url(url)?;
    Some(JobListing { company, title: clean_segment(raw_title), url: url.to_string() })
}

/// Returns `(company, title)` using ordered delimiter heuristics.
pub fn split_company_and_title(raw_title: &str) -> Option<(String, String)> {
    let raw_title = raw_title.trim();

    for delimiter in COMPANY_RIGHT_DELIMITERS {
        if let Some((role, rest)) = split_once_ignore_ascii_case(raw_title, delimiter) {
            let company = clean_segment(rest);
            let role = clean_segment(role);
            if !role.is_empty() && is_plausible_company(&company) {
                return Some((company, role));
            }
        }
    }

    for delimiter in SEGMENT_DELIMITERS {
        let parts: Vec<&str> =
            raw_title.split(delimiter).map(str::trim).filter(|part| !part.is_empty()).collect();
        if parts.len() < 2 {
            continue;
        }

        let first = clean_segment(parts[0]);
        if is_plausible_company(&first) {
            return Some((first, clean_segment(parts[1])));
        }

        let last = clean_segment(parts[parts.len() - 1]);
        if is_plausible_company(&last) {
            return Some((last, first));
        }
    }

    None
}

pub fn company_from_url(url: &str) -> Option<String> {
    let (host, path) = split_url(url)?;

    if ATS_HOSTS.iter().any(|ats| host_matches(&host, ats)) {
        let segment = path.split(['/', '?', '#']).find(|segment| !segment.is_empty())?;
        return Some(humanize(segment));
    }

    let labels: Vec<&str> = host.split('.').filter(|label| !label.is_empty()).collect();
    if labels.len() < 2 {
        return None;
    }
    let tld = labels[labels.len() - 1];
    let second = labels[labels.len() - 2];
    let label = if labels.len() >= 3 && tld.len() == 2 && SECOND_LEVEL_SUFFIXES.contains(&second) {
        labels[labels.len() - 3]
    } else {
        second
    };
    Some(humanize(label))
}

/// ASCII lowercasing keeps byte offsets, so the match index is valid in `text`.
fn split_once_ignore_ascii_case<'a>(text: &'a str, delimiter: &str) -> Option<(&'a str, &'a str)> {
    let start = text.to_ascii_lowercase().find(delimiter)?;
    Some((&text[..start], &text[start + delimiter.len()..]))
}

pub fn is_board_hosted(url: &str, job_boards: &[String]) -> bool {
    let Some((host, _)) = split_url(url) else {
        return false;
    };
    job_boards.iter().any(|board| host_matches(&host, board.trim().to_lowercase().as_str()))
}

/// Fuzzy match against the applied / do-not-apply list. Company must match in
/// either direction; title must too when the stored entry has one.
pub fn matches_applied(listing: &JobListing, applied: &AppliedJob) -> bool {
    if !fuzzy_contains(&listing.company, &applied.company) {
        return false;
    }
    if applied.title.trim().is_empty() {
        return true;
    }
    fuzzy_contains(&listing.title, &applied.title)
}

pub fn format_listings(listings: &[JobListing]) -> String {
    listings
        .iter()
        .enumerate()
        .map(|(index, listing)| {
            format!("{}. {} at {}\n   {}", index + 1, listing.title, listing.company, listing.url)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn fuzzy_contains(left: &str, right: &str) -> bool {
    let left = left.trim().to_lowercase();
    let right = right.trim().to_lowercase();
    if left.is_empty() || right.is_empty() {
        return false;
    }
    left.contains(&right) || right.contains(&left)
}

fn is_plausible_company(candidate: &str) -> bool {
    if candidate.is_empty() || candidate.len() > MAX_COMPANY_LEN {
        return false;
    }
    if candidate.chars().all(|ch| ch.is_ascii_digit() || ch.is_whitespace()) {
        return false;
    }

    let lowered = candidate.to_lowercase();
    if CAREER_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        return false;
    }

    !lowered
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '-'))
        .filter(|word| !word.is_empty())
        .any(|word| TITLE_KEYWORDS.contains(&word) || CAREER_LABELS.contains(&word))
}

/// Cuts trailing segments and ellipses off a title fragment.
fn clean_segment(raw: &str) -> String {
    let mut value = raw.trim();
    for delimiter in SEGMENT_DELIMITERS {
        if let Some((head, _)) = value.split_once(delimiter) {
            value = head.trim();
        }
    }
    value
        .trim_end_matches("...")
        .trim_end_matches('…')
        .trim_matches(|ch: char| ch.is_whitespace() || matches!(ch, ',' | ';' | ':' | '.'))
        .to_string()
}

fn split_url(url: &str) -> Option<(String, String)> {
    let rest = url.trim().split_once("://").map(|(_, rest)| rest).unwrap_or(url.trim());
    let (authority, path) = match rest.find(['/', '?', '#']) {
        Some(index) => (&rest[..index], &rest[index..]),
        None => (rest, ""),
    };
    let host = authority.rsplit('@').next().unwrap_or(authority);
    let host = host.split(':').next().unwrap_or(host).to_lowercase();
    let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    Some((host, path.to_string()))
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn humanize(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use hirewire_core::chrono::Utc;

    use hirewire_core::domain::job::{AppliedJob, ApplicationStatus, JobListing};

    use super::{
        build_search_query, company_from_url, extract_listing, format_listings, is_board_hosted,
        matches_applied, normalize_query, split_company_and_title,
    };

    fn applied(company: &str, title: &str) -> AppliedJob {
        AppliedJob {
            id: "a-1".to_string(),
            user_id: "u-1".to_string(),
            tenant_id: "t-1".to_string(),
            company: company.to_string(),
            title: title.to_string(),
            url: String::new(),
            status: ApplicationStatus::Applied,
            created_at: Utc::now(),
        }
    }

    fn listing(company: &str, title: &str) -> JobListing {
        JobListing {
            company: company.to_string(),
            title: title.to_string(),
            url: "https://acme.com/jobs/1".to_string(),
        }
    }

    #[test]
    fn at_delimiter_puts_company_on_the_right() {
        assert_eq!(
            split_company_and_title("Senior Engineer at Acme"),
            Some(("Acme".to_string(), "Senior Engineer".to_string()))
        );
        assert_eq!(
            split_company_and_title("Data Scientist @ Globex | Careers"),
            Some(("Globex".to_string(), "Data Scientist".to_string()))
        );
    }

    #[test]
    fn at_delimiter_ignores_case() {
        assert_eq!(
            split_company_and_title("Senior Engineer At Acme"),
            Some(("Acme".to_string(), "Senior Engineer".to_string()))
        );
        assert_eq!(
            split_company_and_title("Platform Lead AT Initech"),
            Some(("Initech".to_string(), "Platform Lead".to_string()))
        );
    }

    #[test]
    fn segment_delimiters_prefer_first_plausible_segment() {
        assert_eq!(
            split_company_and_title("Acme - Senior Engineer"),
            Some(("Acme".to_string(), "Senior Engineer".to_string()))
        );
        assert_eq!(
            split_company_and_title("Senior Engineer – Initech"),
            Some(("Initech".to_string(), "Senior Engineer".to_string()))
        );
    }

    #[test]
    fn career_labels_are_not_companies() {
        assert_eq!(
            split_company_and_title("Backend Developer | Careers"),
            None,
            "career-page labels must be rejected"
        );
        assert_eq!(
            split_company_and_title("Platform Engineer - Hooli | Join us"),
            Some(("Hooli".to_string(), "Platform Engineer".to_string()))
        );
    }

    #[test]
    fn no_delimiter_falls_back_to_url_domain() {
        let listing = extract_listing("Staff Platform Engineer", "https://careers.acme.com/jobs/123")
            .expect("listing from url");

        assert_eq!(listing.company, "Acme");
        assert_eq!(listing.title, "Staff Platform Engineer");
    }

    #[test]
    fn country_code_second_level_suffixes_are_skipped() {
        assert_eq!(company_from_url("https://careers.acme.co.uk/jobs/1"), Some("Acme".to_string()));
        assert_eq!(company_from_url("https://jobs.globex.com.au/"), Some("Globex".to_string()));
        assert_eq!(company_from_url("https://www.ox.ac.uk/vacancies"), Some("Ox".to_string()));
        assert_eq!(company_from_url("https://careers.initech.io/"), Some("Initech".to_string()));
    }

    #[test]
    fn ats_hosts_use_first_path_segment() {
        assert_eq!(
            company_from_url("https://boards.greenhouse.io/acme-robotics/jobs/42"),
            Some("Acme Robotics".to_string())
        );
        assert_eq!(company_from_url("https://jobs.lever.co/globex/abc"), Some("Globex".to_string()));
        assert_eq!(company_from_url("https://jobs.ashbyhq.com/"), None);
        assert_eq!(company_from_url("localhost"), None);
    }

    #[test]
    fn board_hosted_results_are_detected_by_host() {
        let boards = vec!["indeed.com".to_string(), "linkedin.com".to_string()];

        assert!(is_board_hosted("https://www.linkedin.com/jobs/view/1", &boards));
        assert!(is_board_hosted("https://uk.indeed.com/viewjob?jk=1", &boards));
        assert!(!is_board_hosted("https://notindeed.com/jobs", &boards));
    }

    #[test]
    fn query_exclusions_use_leading_boards_only() {
        let boards = vec!["a.com".to_string(), "b.com".to_string(), "c.com".to_string()];

        assert_eq!(build_search_query(" rust jobs ", &boards, 2), "rust jobs -site:a.com -site:b.com");
        assert_eq!(build_search_query("rust jobs", &boards, 0), "rust jobs");
        assert_eq!(normalize_query("  Rust   JOBS berlin "), "rust jobs berlin");
    }

    #[test]
    fn applied_matching_is_fuzzy_in_both_directions() {
        assert!(matches_applied(&listing("Acme Corp", "Backend Engineer"), &applied("acme", "")));
        assert!(matches_applied(&listing("Acme", "Senior Backend Engineer"), &applied("ACME Corp", "backend engineer")));
        assert!(!matches_applied(&listing("Acme", "Designer"), &applied("Acme", "Backend Engineer")));
        assert!(!matches_applied(&listing("Globex", "Backend Engineer"), &applied("Acme", "")));
        assert!(!matches_applied(&listing("", "Backend Engineer"), &applied("", "")));
    }

    #[test]
    fn listings_are_numbered() {
        let text = format_listings(&[listing("Acme", "Engineer"), listing("Globex", "Analyst")]);

        assert_eq!(
            text,
            "1. Engineer at Acme\n   https://acme.com/jobs/1\n2. Analyst at Globex\n   https://acme.com/jobs/1"
        );
    }
}
