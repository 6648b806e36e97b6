use super::*;
use crate::error::{Error, FetchError};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rss_page(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, link)| {
            format!(
                "<item><title>{}</title><link>{}</link><pubDate>{}</pubDate></item>",
                title,
                link,
                chrono::Utc::now().to_rfc2822()
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title><link>https://x/</link><description>d</description>{}</channel></rss>"#,
        items
    )
}

fn rss_source(server: &MockServer) -> RssSource {
    RssSource::new(
        "mikan".to_string(),
        format!("{}/feed/{{keyword}}", server.uri()),
        format!("{}/search?q={{keyword}}&page={{page}}", server.uri()),
        "bangumi-sync test",
    )
    .unwrap()
}

fn query(keyword: &str) -> SourceQuery {
    SourceQuery {
        name: "Frieren".to_string(),
        keyword: keyword.to_string(),
        max_page: 1,
        ignore_old_row: true,
    }
}

#[tokio::test]
async fn test_rss_source_reports_max_episode() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed/frieren"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_page(&[
            ("[LoliHouse] Frieren - 04 [1080p]", "magnet:?xt=4"),
            ("[LoliHouse] Frieren - 06 [1080p]", "magnet:?xt=6"),
            ("[LoliHouse] Frieren - 05 [1080p]", "magnet:?xt=5"),
            ("Frieren OST", "magnet:?xt=ost"),
        ])))
        .mount(&server)
        .await;

    let listing = rss_source(&server)
        .fetch_max_episode(&query("frieren"))
        .await
        .unwrap();

    assert_eq!(listing.max_episode, 6);
    assert_eq!(listing.releases.len(), 3);
}

#[tokio::test]
async fn test_rss_source_drops_old_rows() {
    let server = MockServer::start().await;
    let body = format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title><link>https://x/</link><description>d</description>
        <item><title>[A] Show - 12</title><link>magnet:?xt=12</link><pubDate>Mon, 01 Jan 2018 00:00:00 +0000</pubDate></item>
        <item><title>[A] Show - 02</title><link>magnet:?xt=2</link><pubDate>{}</pubDate></item>
        </channel></rss>"#,
        chrono::Utc::now().to_rfc2822()
    );
    Mock::given(method("GET"))
        .and(path("/feed/show"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let source = rss_source(&server);
    let listing = source.fetch_max_episode(&query("show")).await.unwrap();
    assert_eq!(listing.max_episode, 2, "the 2018 row is ignored");

    let mut keep_old = query("show");
    keep_old.ignore_old_row = false;
    let listing = source.fetch_max_episode(&keep_old).await.unwrap();
    assert_eq!(listing.max_episode, 12);
}

#[tokio::test]
async fn test_rss_source_http_error_is_fetch_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed/frieren"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = rss_source(&server)
        .fetch_max_episode(&query("frieren"))
        .await
        .unwrap_err();

    match err {
        Error::Fetch(FetchError::Failed {
            source_id, reason, ..
        }) => {
            assert_eq!(source_id, "mikan");
            assert!(reason.contains("503"));
        }
        other => panic!("expected fetch failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rss_source_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed/frieren"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = rss_source(&server)
        .fetch_max_episode(&query("frieren"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Fetch(FetchError::Malformed { .. })));
}

#[tokio::test]
async fn test_rss_search_walks_pages_until_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_page(&[
            ("[LoliHouse] Frieren - 01", "magnet:?xt=1"),
            ("[Nekomoe] Frieren - 01", "magnet:?xt=1n"),
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_page(&[(
            "[LoliHouse] Frieren - 02",
            "magnet:?xt=2",
        )])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_page(&[])))
        .expect(1)
        .mount(&server)
        .await;

    let source = rss_source(&server);
    let all = source
        .fetch_candidates(
            "frieren",
            &CandidateQuery {
                max_page: 5,
                subtitle: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(all.len(), 3, "page 4 and 5 are never requested");
}

#[tokio::test]
async fn test_rss_search_restricts_subtitle_group() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_page(&[
            ("[LoliHouse] Frieren - 01", "magnet:?xt=1"),
            ("[Nekomoe] Frieren - 01", "magnet:?xt=1n"),
        ])))
        .mount(&server)
        .await;

    let only = rss_source(&server)
        .fetch_candidates(
            "frieren",
            &CandidateQuery {
                max_page: 1,
                subtitle: Some("nekomoe".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].locator, "magnet:?xt=1n");
}

#[tokio::test]
async fn test_static_source_scripted_listing_and_failure() {
    let source = StaticSource::new("static");
    source.set_releases(
        "frieren",
        vec![
            Release::new("Frieren - 01", 1, "magnet:?xt=1").with_group("LoliHouse"),
            Release::new("Frieren - 02", 2, "magnet:?xt=2").with_group("Nekomoe"),
        ],
    );
    source.push_release("frieren", Release::new("Frieren - 03", 3, "magnet:?xt=3"));

    let listing = source.fetch_max_episode(&query("frieren")).await.unwrap();
    assert_eq!(listing.max_episode, 3);

    let nekomoe = source
        .fetch_candidates(
            "frieren",
            &CandidateQuery {
                max_page: 1,
                subtitle: Some("Nekomoe".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(nekomoe.len(), 1);
    assert_eq!(nekomoe[0].episode, 2);

    source.fail("frieren");
    assert!(source.fetch_max_episode(&query("frieren")).await.is_err());
    source.clear_failure("frieren");
    assert!(source.fetch_max_episode(&query("frieren")).await.is_ok());

    let empty = source.fetch_max_episode(&query("unknown")).await.unwrap();
    assert_eq!(empty, EpisodeListing::default());
}

#[tokio::test]
async fn test_static_source_catalog_and_virtual_subscriptions() {
    let source = StaticSource::new("static");
    assert!(source.fetch_catalog().await.unwrap().entries.is_empty());

    source.set_catalog(Catalog {
        entries: vec![CatalogEntry {
            name: "Frieren".into(),
            keyword: "frieren".into(),
            subtitle_groups: vec!["583".into()],
            update_day: Some("Fri".into()),
            cover: None,
        }],
        subtitle_groups: vec![SubtitleGroup {
            id: "583".into(),
            name: "LoliHouse".into(),
        }],
    });
    source.add_virtual_subscription("Tracker Show", 0);

    assert_eq!(source.fetch_catalog().await.unwrap().entries.len(), 1);
    assert_eq!(
        source.virtual_subscriptions(),
        vec![VirtualSubscription {
            name: "Tracker Show".into(),
            episode: 0
        }]
    );
}

#[test]
fn test_from_config_builds_configured_source() {
    let source = from_config(&SourceConfig::Static {
        id: "local".to_string(),
    })
    .unwrap();
    assert_eq!(source.id(), "local");

    let source = from_config(&SourceConfig::Rss {
        id: "mikan".to_string(),
        feed_url_template: "https://mikan.example/RSS/Bangumi?name={keyword}".to_string(),
        search_url_template: "https://mikan.example/RSS/Search?q={keyword}".to_string(),
        user_agent: "ua".to_string(),
    })
    .unwrap();
    assert_eq!(source.id(), "mikan");
}
