use std::collections::HashMap;

use reqwest::{Client, Url};
use serde_derive::Deserialize;

use crate::error::tracker::TrackerError;
use crate::Sha1Hash;

use super::{announce::Announce, response::{Response, ScrapeEntry}};
use super::{Result, URL_ENCODE_RESERVED};

/// The HTTP tracker for a tonnert for which we can request peers as well as to announce transfer progress.
pub struct Tracker {
    /// The HTTP client (from reqwest::Client)
    client: Client,
    url: Url,
}

impl Tracker {
    pub fn new(url: Url) -> Self {
        Tracker {
            client: Client::new(),
            url,
        }
    }

    /// Sends an announce request to the tracker with the specified parameters.
    ///
    /// This may be used by a torrent to request peers to download form.
    /// And report the current status information to the the tracker.
    pub async fn announce(&self, params: Announce) -> Result<Response> {
        let mut query = vec![
            ("port", params.port.to_string()),
            ("downloaded", params.downloaded.to_string()),
            ("uploaded", params.uploaded.to_string()),
            ("left", params.left.to_string()),
            ("compact", "1".to_string()),
        ];

        if let Some(peer_count) = params.peer_count {
            query.push(("numwant", peer_count.to_string()));
        }
        if let Some(ip) = &params.ip {
            query.push(("ip", ip.to_string()));
        }
        if let Some(event) = &params.event {
            query.push(("event", event.as_str().to_string()));
        }
        if let Some(tracker_id) = &params.tracker_id {
            query.push(("trackerid", tracker_id.clone()));
        }

        let url = format!(
            "{url}\
            ?info_hash={info_hash}\
            &peer_id={peer_id}",
            url = self.url,
            info_hash = percent_encoding::percent_encode(&params.info_hash, URL_ENCODE_RESERVED),
            peer_id = percent_encoding::percent_encode(&params.peer_id, URL_ENCODE_RESERVED)
        );

        let resp = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let resp: Response = serde_bencode::from_bytes(&resp)?;
        // A non-empty `failure reason` means no other field in the response
        // is valid (BEP 3): surface it as an error rather than returning an
        // empty-looking success.
        if let Some(reason) = resp.failure_reason {
            return Err(TrackerError::Failure(reason));
        }
        Ok(resp)
    }

    /// BEP 3 scrape: swaps the last `/announce` path segment for `/scrape`
    /// and requests this torrent's seeder/leecher/downloaded counts. Returns
    /// `NoScrapeConvention` if the announce URL's last path segment isn't
    /// literally `announce`, since no scrape URL can be derived.
    pub async fn scrape(&self, info_hash: &Sha1Hash) -> Result<ScrapeEntry> {
        let scrape_url = scrape_url(&self.url).ok_or(TrackerError::NoScrapeConvention)?;

        let url = format!(
            "{url}?info_hash={info_hash}",
            url = scrape_url,
            info_hash = percent_encoding::percent_encode(info_hash, URL_ENCODE_RESERVED),
        );

        let resp = self.client.get(&url).send().await?.error_for_status()?.bytes().await?;

        #[derive(Deserialize)]
        struct ScrapeResponse {
            files: HashMap<String, ScrapeEntry>,
        }
        let mut resp: ScrapeResponse = serde_bencode::from_bytes(&resp)?;
        resp
            .files
            .drain()
            .next()
            .map(|(_, entry)| entry)
            .ok_or(TrackerError::NoScrapeConvention)
    }
}

fn scrape_url(announce: &Url) -> Option<Url> {
    let mut segments: Vec<String> = announce.path_segments()?.map(String::from).collect();
    let last = segments.last_mut()?;
    if last != "announce" {
        return None;
    }
    *last = "scrape".to_string();

    let mut url = announce.clone();
    url.set_path(&segments.join("/"));
    Some(url)
}
