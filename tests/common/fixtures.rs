//! Feed fixtures and aria2 mock responders

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Magnet link for one fixture release
pub fn magnet(show: &str, episode: u32) -> String {
    format!(
        "magnet:?xt=urn:btih:{}{:02}&dn={}",
        show.to_lowercase().replace(' ', ""),
        episode,
        show.replace(' ', "+")
    )
}

/// RSS 2.0 document with one item per `(group, episode)`, published now
pub fn rss_feed(show: &str, releases: &[(&str, u32)]) -> String {
    let published = chrono::Utc::now().to_rfc2822();
    let items: String = releases
        .iter()
        .map(|(group, episode)| {
            format!(
                r#"<item>
    <title>[{group}] {show} - {episode:02} [1080p][CHS]</title>
    <link>https://mikan.example/Episode/{episode}</link>
    <enclosure url="{url}" length="0" type="application/x-bittorrent"/>
    <pubDate>{published}</pubDate>
</item>"#,
                url = magnet(show, *episode).replace('&', "&amp;"),
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0">
<channel>
    <title>Mikan Project - {show}</title>
    <link>https://mikan.example/</link>
    <description>{show}</description>
    {items}
</channel>
</rss>"#
    )
}

/// Serve `body` as the feed of `keyword`
pub async fn mount_feed(server: &MockServer, keyword: &str, body: String) {
    Mock::given(method("GET"))
        .and(path("/RSS/Bangumi"))
        .and(query_param("keyword", keyword))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Make the feed of `keyword` fail with `status`
pub async fn mount_feed_error(server: &MockServer, keyword: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path("/RSS/Bangumi"))
        .and(query_param("keyword", keyword))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Accept every `aria2.addUri` with `gid`
pub async fn mount_add_uri(server: &MockServer, gid: &str) {
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({ "method": "aria2.addUri" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "bangumi-sync",
            "jsonrpc": "2.0",
            "result": gid,
        })))
        .mount(server)
        .await;
}

/// Refuse every `aria2.addUri` with an RPC error
pub async fn mount_add_uri_error(server: &MockServer, message: &str) {
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({ "method": "aria2.addUri" })))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "id": "bangumi-sync",
            "jsonrpc": "2.0",
            "error": { "code": 1, "message": message },
        })))
        .mount(server)
        .await;
}

/// Report `status` for every `aria2.tellStatus`
pub async fn mount_tell_status(server: &MockServer, status: &str) {
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({ "method": "aria2.tellStatus" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "bangumi-sync",
            "jsonrpc": "2.0",
            "result": { "status": status },
        })))
        .mount(server)
        .await;
}
