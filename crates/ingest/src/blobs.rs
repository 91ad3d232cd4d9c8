use chrono::{DateTime, Utc};
use log::debug;
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::blocking::Client;

use crate::types::{IngestError, Result};

/// One object-storage entry as returned by the listing API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMeta {
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Listing seam over the billing-export container. The production
/// implementation is [`AzureBlobLister`]; tests script a fixed blob set.
pub trait BlobLister {
    fn list_blobs(&self) -> Result<Vec<BlobMeta>>;
}

/// Lists the container through the Blob service REST API, authenticated by
/// the same SAS token the staging load hands to `azureBlobStorage`.
pub struct AzureBlobLister {
    http: Client,
    account: String,
    container: String,
    sas_token: String,
}

impl AzureBlobLister {
    pub fn new(account: &str, container: &str, sas_token: &str) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|err| IngestError::Listing(err.to_string()))?;
        Ok(Self {
            http,
            account: account.to_string(),
            container: container.to_string(),
            sas_token: sas_token.trim_start_matches('?').to_string(),
        })
    }

    // The SAS token is already a percent-encoded query string, so it is
    // appended verbatim; the continuation marker goes through normal query
    // encoding.
    fn list_url(&self) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}?restype=container&comp=list&{}",
            self.account, self.container, self.sas_token
        )
    }
}

impl BlobLister for AzureBlobLister {
    fn list_blobs(&self) -> Result<Vec<BlobMeta>> {
        let mut blobs = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut request = self.http.get(self.list_url());
            if let Some(marker) = &marker {
                request = request.query(&[("marker", marker)]);
            }
            let response = request
                .send()
                .map_err(|err| IngestError::Listing(err.to_string()))?;
            let status = response.status();
            let body = response
                .text()
                .map_err(|err| IngestError::Listing(err.to_string()))?;
            if !status.is_success() {
                return Err(IngestError::Listing(format!(
                    "list blobs returned status {status}: {}",
                    body.trim_end()
                )));
            }
            let (page, next_marker) = parse_list_response(&body)?;
            debug!("listed {} blobs in page", page.len());
            blobs.extend(page);
            match next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(blobs)
    }
}

#[derive(Default)]
struct PendingBlob {
    name: Option<String>,
    size: Option<u64>,
    last_modified: Option<DateTime<Utc>>,
}

/// Parse one `List Blobs` XML page into blob metadata plus the continuation
/// marker, if the listing is truncated.
fn parse_list_response(body: &str) -> Result<(Vec<BlobMeta>, Option<String>)> {
    let mut reader = Reader::from_str(body);
    let mut blobs = Vec::new();
    let mut next_marker = None;
    let mut pending: Option<PendingBlob> = None;
    let mut tag = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                if tag == "Blob" {
                    pending = Some(PendingBlob::default());
                }
            }
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|err| IngestError::Listing(format!("malformed listing: {err}")))?
                    .into_owned();
                if let Some(blob) = pending.as_mut() {
                    match tag.as_str() {
                        "Name" => blob.name = Some(value),
                        "Last-Modified" => {
                            let parsed = DateTime::parse_from_rfc2822(&value).map_err(|err| {
                                IngestError::Listing(format!(
                                    "bad Last-Modified value {value:?}: {err}"
                                ))
                            })?;
                            blob.last_modified = Some(parsed.with_timezone(&Utc));
                        }
                        "Content-Length" => {
                            let parsed = value.parse().map_err(|err| {
                                IngestError::Listing(format!(
                                    "bad Content-Length value {value:?}: {err}"
                                ))
                            })?;
                            blob.size = Some(parsed);
                        }
                        _ => {}
                    }
                } else if tag == "NextMarker" && !value.is_empty() {
                    next_marker = Some(value);
                }
            }
            Ok(Event::End(end)) => {
                if end.name().as_ref() == b"Blob" {
                    if let Some(blob) = pending.take() {
                        if let (Some(name), Some(size), Some(last_modified)) =
                            (blob.name, blob.size, blob.last_modified)
                        {
                            blobs.push(BlobMeta {
                                name,
                                size,
                                last_modified,
                            });
                        }
                    }
                }
                tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(IngestError::Listing(format!("malformed listing: {err}")));
            }
            _ => {}
        }
    }
    Ok((blobs, next_marker))
}
