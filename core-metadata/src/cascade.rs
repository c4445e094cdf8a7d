//! # Fallback Search Cascade
//!
//! Artwork lookups try a fixed, ordered list of search queries and stop at
//! the first acceptable result. The list is plain data ([`SearchStrategy`])
//! produced by [`artist_strategies`] and [`album_strategies`]; a single
//! executor, [`run_cascade`], evaluates it against any provider's search
//! function.
//!
//! Queries use the `field:"value"` phrase syntax understood by both Spotify
//! and Deezer.

use crate::error::Result;
use crate::romanize::romanize;
use std::collections::HashSet;
use std::future::Future;
use tracing::debug;

/// Entity type selector passed to a provider search endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchKind {
    Artist,
    Album,
}

impl SearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchKind::Artist => "artist",
            SearchKind::Album => "album",
        }
    }
}

/// One query in a cascade along with the names a result must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchStrategy {
    pub kind: SearchKind,
    /// Short tag for logs ("romanized_quoted", "album_only", ...)
    pub label: &'static str,
    pub query: String,
    /// A result is accepted when its name equals or contains one of these,
    /// ignoring case.
    pub accept: Vec<String>,
}

impl SearchStrategy {
    fn new(kind: SearchKind, label: &'static str, query: String, accept: Vec<String>) -> Self {
        Self {
            kind,
            label,
            query,
            accept,
        }
    }

    /// Whether `candidate` satisfies this strategy.
    ///
    /// Candidates without artwork never match.
    pub fn accepts(&self, candidate: &Candidate) -> bool {
        if !candidate.has_image() {
            return false;
        }
        let name = candidate.name.to_lowercase();
        self.accept.iter().any(|target| {
            let target = target.to_lowercase();
            !target.is_empty() && (name == target || name.contains(&target))
        })
    }
}

/// Search result reduced to what the cascade needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub image_url: Option<String>,
}

impl Candidate {
    pub fn new(name: impl Into<String>, image_url: Option<String>) -> Self {
        Self {
            name: name.into(),
            image_url,
        }
    }

    pub fn has_image(&self) -> bool {
        self.image_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

/// First accepted result of a cascade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeHit {
    pub label: &'static str,
    pub query: String,
    pub name: String,
    pub image_url: String,
}

/// Trim, drop empties and drop case-insensitive repeats, keeping first-seen order.
pub fn unique_ignoring_case<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .iter()
        .map(|v| v.as_ref().trim())
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.to_lowercase()))
        .map(str::to_string)
        .collect()
}

fn quoted(field: &str, value: &str) -> String {
    format!("{}:\"{}\"", field, value)
}

fn loose(field: &str, value: &str) -> String {
    format!("{}:{}", field, value)
}

fn any_of(field: &str, values: &[String]) -> String {
    values
        .iter()
        .map(|v| quoted(field, v))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Artist lookup order:
///
/// 1. romanized form of each alias, quoted
/// 2. each alias, quoted
/// 3. each alias, unquoted
/// 4. all aliases OR-ed together (only with more than one alias)
pub fn artist_strategies<S: AsRef<str>>(aliases: &[S]) -> Vec<SearchStrategy> {
    let aliases = unique_ignoring_case(aliases);
    let mut strategies = Vec::new();

    for alias in &aliases {
        if let Some(romanized) = romanize(alias) {
            strategies.push(SearchStrategy::new(
                SearchKind::Artist,
                "romanized_quoted",
                quoted("artist", &romanized),
                vec![romanized, alias.clone()],
            ));
        }
    }

    for alias in &aliases {
        strategies.push(SearchStrategy::new(
            SearchKind::Artist,
            "quoted",
            quoted("artist", alias),
            vec![alias.clone()],
        ));
    }

    for alias in &aliases {
        strategies.push(SearchStrategy::new(
            SearchKind::Artist,
            "loose",
            loose("artist", alias),
            vec![alias.clone()],
        ));
    }

    if aliases.len() > 1 {
        strategies.push(SearchStrategy::new(
            SearchKind::Artist,
            "combined",
            any_of("artist", &aliases),
            aliases.clone(),
        ));
    }

    strategies
}

/// Album lookup order:
///
/// 1. per artist, up to eight artist/album phrasings mixing quoted and
///    unquoted artist with original and romanized names
/// 2. all artists OR-ed together with the album, original then romanized
/// 3. album title alone: romanized quoted, romanized unquoted, original
///    quoted, original unquoted
///
/// Variants that need a romanized form are skipped when the name is
/// already Latin script.
pub fn album_strategies<S: AsRef<str>>(artists: &[S], album: &str) -> Vec<SearchStrategy> {
    let album = album.trim();
    if album.is_empty() {
        return Vec::new();
    }

    let artists = unique_ignoring_case(artists);
    let romanized_album = romanize(album);
    let mut accept = vec![album.to_string()];
    if let Some(r) = &romanized_album {
        accept.push(r.clone());
    }

    let album_strategy = |label: &'static str, query: String| {
        SearchStrategy::new(SearchKind::Album, label, query, accept.clone())
    };

    let mut strategies = Vec::new();

    for artist in &artists {
        let romanized_artist = romanize(artist);
        let rb = romanized_album.as_deref();
        let ra = romanized_artist.as_deref();

        let mut queries = Vec::new();
        if let Some(rb) = rb {
            queries.push(format!("{} {}", quoted("artist", artist), quoted("album", rb)));
        }
        if let Some(ra) = ra {
            queries.push(format!("{} {}", quoted("artist", ra), quoted("album", album)));
            if let Some(rb) = rb {
                queries.push(format!("{} {}", quoted("artist", ra), quoted("album", rb)));
            }
        }
        queries.push(format!("{} {}", quoted("artist", artist), quoted("album", album)));

        queries.push(format!("{} {}", loose("artist", artist), quoted("album", album)));
        if let Some(rb) = rb {
            queries.push(format!("{} {}", loose("artist", artist), quoted("album", rb)));
        }
        if let Some(ra) = ra {
            queries.push(format!("{} {}", loose("artist", ra), quoted("album", album)));
            if let Some(rb) = rb {
                queries.push(format!("{} {}", loose("artist", ra), quoted("album", rb)));
            }
        }

        strategies.extend(
            queries
                .into_iter()
                .map(|query| album_strategy("artist_album", query)),
        );
    }

    if artists.len() > 1 {
        let combined = any_of("artist", &artists);
        strategies.push(album_strategy(
            "combined_artists",
            format!("({}) {}", combined, quoted("album", album)),
        ));
        if let Some(rb) = &romanized_album {
            strategies.push(album_strategy(
                "combined_artists",
                format!("({}) {}", combined, quoted("album", rb)),
            ));
        }
    }

    if let Some(rb) = &romanized_album {
        strategies.push(album_strategy("album_only", quoted("album", rb)));
        strategies.push(album_strategy("album_only", loose("album", rb)));
    }
    strategies.push(album_strategy("album_only", quoted("album", album)));
    strategies.push(album_strategy("album_only", loose("album", album)));

    strategies
}

/// Evaluate `strategies` in order with `search`, returning the first
/// accepted candidate.
///
/// A search error aborts the cascade; an empty or non-matching result moves
/// on to the next strategy.
pub async fn run_cascade<F, Fut>(
    strategies: &[SearchStrategy],
    mut search: F,
) -> Result<Option<CascadeHit>>
where
    F: FnMut(SearchKind, String) -> Fut,
    Fut: Future<Output = Result<Vec<Candidate>>>,
{
    for strategy in strategies {
        let candidates = search(strategy.kind, strategy.query.clone()).await?;

        if let Some(found) = candidates.into_iter().find(|c| strategy.accepts(c)) {
            debug!(
                strategy = strategy.label,
                query = %strategy.query,
                matched = %found.name,
                "Cascade matched"
            );
            let image_url = found.image_url.unwrap_or_default();
            return Ok(Some(CascadeHit {
                label: strategy.label,
                query: strategy.query.clone(),
                name: found.name,
                image_url,
            }));
        }
    }

    debug!(strategies = strategies.len(), "Cascade exhausted without a match");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetadataError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn queries(strategies: &[SearchStrategy]) -> Vec<&str> {
        strategies.iter().map(|s| s.query.as_str()).collect()
    }

    #[test]
    fn test_unique_ignoring_case_keeps_first_spelling() {
        let aliases = unique_ignoring_case(&["Drake", " drake ", "", "DRAKE", "Aubrey"]);
        assert_eq!(aliases, vec!["Drake", "Aubrey"]);
    }

    #[test]
    fn test_artist_strategies_for_latin_aliases() {
        let strategies = artist_strategies(&["Drake"]);
        assert_eq!(queries(&strategies), vec![r#"artist:"Drake""#, "artist:Drake"]);
    }

    #[test]
    fn test_artist_strategies_order_with_romanization() {
        let romanized = romanize("米津玄師").unwrap();
        let strategies = artist_strategies(&["米津玄師", "Kenshi Yonezu"]);

        assert_eq!(
            queries(&strategies),
            vec![
                format!("artist:\"{}\"", romanized),
                r#"artist:"米津玄師""#.to_string(),
                r#"artist:"Kenshi Yonezu""#.to_string(),
                "artist:米津玄師".to_string(),
                "artist:Kenshi Yonezu".to_string(),
                r#"artist:"米津玄師" OR artist:"Kenshi Yonezu""#.to_string(),
            ]
        );
        assert_eq!(strategies[0].label, "romanized_quoted");
        assert_eq!(strategies[0].accept, vec![romanized, "米津玄師".to_string()]);
        assert_eq!(strategies[5].label, "combined");
    }

    #[test]
    fn test_album_strategies_for_latin_names() {
        let strategies = album_strategies(&["Drake"], "Views");
        assert_eq!(
            queries(&strategies),
            vec![
                r#"artist:"Drake" album:"Views""#,
                r#"artist:Drake album:"Views""#,
                r#"album:"Views""#,
                "album:Views",
            ]
        );
    }

    #[test]
    fn test_album_strategies_full_variant_set() {
        let ra = romanize("宇多田ヒカル").unwrap();
        let rb = romanize("初恋").unwrap();
        let strategies = album_strategies(&["宇多田ヒカル", "Hikaru Utada"], "初恋");
        let q = queries(&strategies);

        // Eight phrasings for the non-Latin artist.
        assert_eq!(q[0], format!("artist:\"宇多田ヒカル\" album:\"{}\"", rb));
        assert_eq!(q[1], format!("artist:\"{}\" album:\"初恋\"", ra));
        assert_eq!(q[2], format!("artist:\"{}\" album:\"{}\"", ra, rb));
        assert_eq!(q[3], "artist:\"宇多田ヒカル\" album:\"初恋\"");
        assert_eq!(q[4], "artist:宇多田ヒカル album:\"初恋\"");
        assert_eq!(q[5], format!("artist:宇多田ヒカル album:\"{}\"", rb));
        assert_eq!(q[6], format!("artist:{} album:\"初恋\"", ra));
        assert_eq!(q[7], format!("artist:{} album:\"{}\"", ra, rb));

        // Latin artist skips the romanized-artist variants.
        assert_eq!(q[8], format!("artist:\"Hikaru Utada\" album:\"{}\"", rb));
        assert_eq!(q[9], "artist:\"Hikaru Utada\" album:\"初恋\"");
        assert_eq!(q[10], "artist:Hikaru Utada album:\"初恋\"");
        assert_eq!(q[11], format!("artist:Hikaru Utada album:\"{}\"", rb));

        assert_eq!(
            q[12],
            "(artist:\"宇多田ヒカル\" OR artist:\"Hikaru Utada\") album:\"初恋\""
        );
        assert_eq!(
            q[13],
            format!("(artist:\"宇多田ヒカル\" OR artist:\"Hikaru Utada\") album:\"{}\"", rb)
        );

        assert_eq!(q[14], format!("album:\"{}\"", rb));
        assert_eq!(q[15], format!("album:{}", rb));
        assert_eq!(q[16], "album:\"初恋\"");
        assert_eq!(q[17], "album:初恋");
        assert_eq!(q.len(), 18);
    }

    #[test]
    fn test_empty_album_has_no_strategies() {
        assert!(album_strategies(&["Drake"], "  ").is_empty());
    }

    #[test]
    fn test_acceptance_requires_image_and_name_match() {
        let strategy = &artist_strategies(&["Drake"])[0];

        assert!(strategy.accepts(&Candidate::new("DRAKE", Some("https://img/1".into()))));
        assert!(strategy.accepts(&Candidate::new("Drake & Future", Some("https://img/2".into()))));
        assert!(!strategy.accepts(&Candidate::new("Drake", None)));
        assert!(!strategy.accepts(&Candidate::new("Drake", Some(String::new()))));
        assert!(!strategy.accepts(&Candidate::new("Future", Some("https://img/3".into()))));
    }

    #[tokio::test]
    async fn test_run_cascade_stops_at_first_accepted_result() {
        let strategies = artist_strategies(&["Drake"]);
        let seen = Mutex::new(Vec::new());
        let responses: HashMap<&str, Vec<Candidate>> = HashMap::from([
            (
                r#"artist:"Drake""#,
                vec![Candidate::new("Drake Bell", None)],
            ),
            (
                "artist:Drake",
                vec![
                    Candidate::new("Not Him", Some("https://img/x".into())),
                    Candidate::new("Drake", Some("https://img/drake".into())),
                ],
            ),
        ]);

        let hit = run_cascade(&strategies, |_, query| {
            seen.lock().unwrap().push(query.clone());
            let result = responses.get(query.as_str()).cloned().unwrap_or_default();
            async move { Ok(result) }
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(hit.image_url, "https://img/drake");
        assert_eq!(hit.label, "loose");
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_cascade_miss_is_none() {
        let strategies = album_strategies(&["Drake"], "Views");
        let hit = run_cascade(&strategies, |_, _| async { Ok(Vec::new()) })
            .await
            .unwrap();
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn test_run_cascade_propagates_search_errors() {
        let strategies = artist_strategies(&["Drake"]);
        let calls = Mutex::new(0);
        let result = run_cascade(&strategies, |_, _| {
            *calls.lock().unwrap() += 1;
            async {
                Err(MetadataError::HttpError {
                    status: 500,
                    body: "boom".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(MetadataError::HttpError { status: 500, .. })));
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
