/*
 * Copyright (c) 2025 Craig Hamilton and Contributors.
 * Licensed under either of
 *  - Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> OR
 *  - MIT license <http://opensource.org/licenses/MIT>
 *  at your option.
 */

use std::{fs::File, io::Write, path::Path};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use futures::{Stream, StreamExt, TryStreamExt, stream};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::StatusCode;
use reqwest_oauth1::OAuthClientProvider;
use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;

use crate::catalog::{
    Album, DateRange, Downloaded, ListingSummary, MediaType, Original, PhotoCatalog, PhotoRef,
    Selection, UserInfo, local_timestamp,
};
use crate::error::{FlickrdError, Result};
use crate::tokens::Credential;

const API_ENDPOINT: &str = "https://api.flickr.com/services/rest/";
const PER_PAGE: u64 = 500;
const EXTRAS: &str = "date_taken,date_upload,media,original_format";

/// Signed access to the Flickr REST api on behalf of one user
#[derive(Clone)]
pub(crate) struct FlickrClient {
    http: reqwest::Client,
    api_key: String,
    secret_key: String,
    token: String,
    token_secret: String,
    user_id: String,
}

/// One page of a photo listing
#[derive(Debug)]
struct PhotoPage {
    pages: u64,
    total: u64,
    title: Option<String>,
    photos: Vec<PhotoRef>,
}

impl FlickrClient {
    pub(crate) fn new(secret_key: &str, credential: &Credential) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: credential.api_key.clone(),
            secret_key: secret_key.to_string(),
            token: credential.token.clone(),
            token_secret: credential.token_secret.clone(),
            user_id: credential.user_nsid.clone(),
        }
    }

    // Calls a REST method, returning Flickr's own failure reply as data
    async fn call_api<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<ApiReply<T>> {
        let secrets = reqwest_oauth1::Secrets::new(self.api_key.as_str(), self.secret_key.as_str())
            .token(self.token.as_str(), self.token_secret.as_str());

        let mut query: Vec<(&str, &str)> = vec![
            ("method", method),
            ("format", "json"),
            ("nojsoncallback", "1"),
        ];
        query.extend(params.iter().map(|(k, v)| (*k, v.as_str())));
        log::trace!("Calling {} {:?}", method, params);

        let resp = self
            .http
            .clone()
            .oauth1(secrets)
            .get(API_ENDPOINT)
            .query(&query)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FlickrdError::RemoteApi(format!(
                "{}: rate limit exceeded (HTTP 429)",
                method
            )));
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(FlickrdError::Auth(format!("{}: HTTP 401", method)));
        }
        if !status.is_success() {
            return Err(FlickrdError::RemoteApi(format!("{}: HTTP {}", method, status)));
        }

        let body = resp.text().await?;
        parse_reply(method, &body)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> Result<T> {
        match self.call_api(method, params).await? {
            ApiReply::Ok(value) => Ok(value),
            ApiReply::Failed { code, message } => Err(failure_to_error(method, code, &message)),
        }
    }

    /// Confirms the token is accepted, returning the user's NSID
    pub(crate) async fn test_login(&self) -> Result<String> {
        let login: LoginEnvelope = self.call("flickr.test.login", &[]).await?;
        Ok(login.user.id)
    }

    pub(crate) async fn user_info(&self) -> Result<UserInfo> {
        let envelope: PersonEnvelope = self
            .call("flickr.people.getInfo", &[("user_id", self.user_id.clone())])
            .await?;
        Ok(envelope.person.into())
    }

    /// Albums owned by the user
    pub(crate) async fn albums(&self) -> Result<Vec<Album>> {
        let mut albums = Vec::new();
        let mut page = 1;
        loop {
            let envelope: PhotosetsEnvelope = self
                .call(
                    "flickr.photosets.getList",
                    &[
                        ("user_id", self.user_id.clone()),
                        ("page", page.to_string()),
                        ("per_page", PER_PAGE.to_string()),
                    ],
                )
                .await?;
            let pages = envelope.photosets.pages;
            albums.extend(envelope.photosets.photoset.into_iter().map(Album::from));
            if page >= pages {
                break;
            }
            page += 1;
        }
        Ok(albums)
    }

    pub(crate) fn list_all(&self) -> impl Stream<Item = Result<PhotoRef>> + '_ {
        self.paged(Selection::All)
    }

    pub(crate) fn list_album(&self, album_id: String) -> impl Stream<Item = Result<PhotoRef>> + '_ {
        self.paged(Selection::Album(album_id))
    }

    /// Photos taken on the days from `start` to `end`, both included
    pub(crate) fn list_taken_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Stream<Item = Result<PhotoRef>> + '_ {
        self.paged(Selection::Taken(DateRange::new(start, Some(end))))
    }

    /// Photos uploaded on the days from `start` to `end`, both included
    pub(crate) fn list_posted_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Stream<Item = Result<PhotoRef>> + '_ {
        self.paged(Selection::Posted(DateRange::new(start, Some(end))))
    }

    fn paged(&self, selection: Selection) -> impl Stream<Item = Result<PhotoRef>> + '_ {
        paginate(move |page| {
            let selection = selection.clone();
            async move {
                let mut listing = self.fetch_page(&selection, page, PER_PAGE).await?;
                log::debug!(
                    "Listed page {}/{} of {} ({} photos in total)",
                    page,
                    listing.pages,
                    selection,
                    listing.total
                );
                listing.photos.retain(|p| selection.admits(p));
                Ok(listing)
            }
        })
    }

    async fn fetch_page(&self, selection: &Selection, page: u64, per_page: u64) -> Result<PhotoPage> {
        let (method, params) = selection_params(selection, &self.user_id, page, per_page);
        let page = match selection {
            Selection::Album(_) => {
                let envelope: PhotosetEnvelope = self.call(method, &params).await?;
                envelope.photoset
            }
            _ => {
                let envelope: PhotosEnvelope = self.call(method, &params).await?;
                envelope.photos
            }
        };
        Ok(PhotoPage {
            pages: page.pages,
            total: page.total,
            title: page.title,
            photos: page.photo.into_iter().map(PhotoRef::from).collect(),
        })
    }

    async fn camera_model(&self, photo_id: &str) -> Result<Option<String>> {
        let reply: ApiReply<ExifEnvelope> = self
            .call_api("flickr.photos.getExif", &[("photo_id", photo_id.to_string())])
            .await?;
        match reply {
            ApiReply::Ok(envelope) => Ok(envelope.camera_model()),
            ApiReply::Failed { code, message } if !is_auth_failure(code) => {
                log::debug!("No EXIF for photo {}: {} ({})", photo_id, message, code);
                Ok(None)
            }
            ApiReply::Failed { code, message } => {
                Err(failure_to_error("flickr.photos.getExif", code, &message))
            }
        }
    }
}

impl PhotoCatalog for FlickrClient {
    fn photos(&self, selection: &Selection) -> impl Stream<Item = Result<PhotoRef>> + '_ {
        match selection {
            Selection::All => self.list_all().boxed_local(),
            Selection::Album(id) => self.list_album(id.clone()).boxed_local(),
            Selection::Taken(range) => self.list_taken_between(range.start, range.end).boxed_local(),
            Selection::Posted(range) => self.list_posted_between(range.start, range.end).boxed_local(),
        }
    }

    async fn summary(&self, selection: &Selection) -> Result<ListingSummary> {
        let page = self.fetch_page(selection, 1, 1).await?;
        Ok(ListingSummary {
            total: page.total,
            title: page.title,
        })
    }

    async fn resolve_original(&self, photo: &PhotoRef) -> Result<Original> {
        let sizes: SizesEnvelope = self
            .call("flickr.photos.getSizes", &[("photo_id", photo.id.clone())])
            .await?;
        let largest = sizes.largest().ok_or_else(|| {
            FlickrdError::RemoteApi(format!("photo {} has no downloadable size", photo.id))
        })?;
        let camera = self.camera_model(&photo.id).await?;

        Ok(Original {
            url: largest.source,
            camera,
            width: largest.width as u32,
            height: largest.height as u32,
        })
    }

    async fn download(&self, original: &Original, dest: &Path) -> Result<Downloaded> {
        let mut resp = self.http.get(&original.url).send().await?;
        if !resp.status().is_success() {
            return Err(FlickrdError::RemoteApi(format!(
                "download of {} returned HTTP {}",
                original.url,
                resp.status()
            )));
        }

        let progress = progress_bar(resp.content_length());
        let mut file = File::create(dest).map_err(|e| FlickrdError::filesystem(dest, e))?;
        let mut digest = md5::Context::new();
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk)
                .map_err(|e| FlickrdError::filesystem(dest, e))?;
            digest.consume(&chunk);
            written += chunk.len() as u64;
            progress.inc(chunk.len() as u64);
        }
        file.sync_all().map_err(|e| FlickrdError::filesystem(dest, e))?;
        progress.finish_and_clear();

        Ok(Downloaded {
            bytes: written,
            md5: format!("{:x}", digest.compute()),
        })
    }
}

// Flat stream over all pages. Page n+1 is requested only once page n is used
// up, and every call starts again from page 1.
fn paginate<'a, F, Fut>(fetch_page: F) -> impl Stream<Item = Result<PhotoRef>> + 'a
where
    F: FnMut(u64) -> Fut + 'a,
    Fut: Future<Output = Result<PhotoPage>> + 'a,
{
    stream::try_unfold(
        (Some(1u64), fetch_page),
        |(next_page, mut fetch_page)| async move {
            let Some(page) = next_page else {
                return Ok(None);
            };
            let listing = fetch_page(page).await?;
            let next = (page < listing.pages).then_some(page + 1);
            let photos = stream::iter(listing.photos.into_iter().map(Ok::<PhotoRef, FlickrdError>));
            Ok::<_, FlickrdError>(Some((photos, (next, fetch_page))))
        },
    )
    .try_flatten()
}

// Byte counter on stderr; indicatif hides it when stderr is not a terminal
fn progress_bar(length: Option<u64>) -> ProgressBar {
    match length {
        Some(length) => {
            let style = ProgressStyle::with_template(
                "  [{bar:30}] {percent:>3}% ({bytes}/{total_bytes})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
            ProgressBar::new(length).with_style(style)
        }
        None => {
            let style = ProgressStyle::with_template("  {spinner} {bytes}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            ProgressBar::new_spinner().with_style(style)
        }
    }
}

// Method name and arguments for one page of a selection
fn selection_params(
    selection: &Selection,
    user_id: &str,
    page: u64,
    per_page: u64,
) -> (&'static str, Vec<(&'static str, String)>) {
    let mut params = vec![
        ("user_id", user_id.to_string()),
        ("extras", EXTRAS.to_string()),
        ("page", page.to_string()),
        ("per_page", per_page.to_string()),
    ];
    let method = match selection {
        Selection::All => "flickr.photos.search",
        Selection::Album(id) => {
            params.push(("photoset_id", id.clone()));
            "flickr.photosets.getPhotos"
        }
        Selection::Taken(range) => {
            // mysql datetime, interpreted by Flickr like the camera's local time
            params.push(("min_taken_date", range.first_moment().format("%Y-%m-%d %H:%M:%S").to_string()));
            params.push(("max_taken_date", range.last_moment().format("%Y-%m-%d %H:%M:%S").to_string()));
            "flickr.photos.search"
        }
        Selection::Posted(range) => {
            params.push(("min_upload_date", local_timestamp(range.first_moment()).to_string()));
            params.push(("max_upload_date", local_timestamp(range.last_moment()).to_string()));
            "flickr.photos.search"
        }
    };
    (method, params)
}

fn from_unix(secs: u64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(secs as i64, 0).map(|dt| dt.with_timezone(&Local).naive_local())
}

/// A parsed REST reply
#[derive(Debug)]
enum ApiReply<T> {
    Ok(T),
    Failed { code: u64, message: String },
}

fn parse_reply<T: DeserializeOwned>(method: &str, body: &str) -> Result<ApiReply<T>> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| FlickrdError::RemoteApi(format!("{}: unreadable reply: {}", method, e)))?;

    if value.get("stat").and_then(Value::as_str) == Some("fail") {
        let code = value.get("code").and_then(Value::as_u64).unwrap_or_default();
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown failure")
            .to_string();
        return Ok(ApiReply::Failed { code, message });
    }

    serde_json::from_value(value)
        .map(ApiReply::Ok)
        .map_err(|e| FlickrdError::RemoteApi(format!("{}: unexpected reply: {}", method, e)))
}

// 96-99 are signature/login failures, 100 an invalid api key
fn is_auth_failure(code: u64) -> bool {
    (96..=100).contains(&code)
}

fn failure_to_error(method: &str, code: u64, message: &str) -> FlickrdError {
    let msg = format!("{}: {} (code {})", method, message, code);
    if is_auth_failure(code) {
        FlickrdError::Auth(msg)
    } else {
        FlickrdError::RemoteApi(msg)
    }
}

// Flickr sends counts either as numbers or as strings
#[derive(Deserialize)]
#[serde(untagged)]
enum Num {
    Int(u64),
    Str(String),
}

impl Num {
    fn value<E: serde::de::Error>(self) -> std::result::Result<u64, E> {
        match self {
            Num::Int(v) => Ok(v),
            Num::Str(s) if s.trim().is_empty() => Ok(0),
            Num::Str(s) => s.trim().parse().map_err(E::custom),
        }
    }
}

fn de_u64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    Num::deserialize(d)?.value()
}

fn de_opt_u64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u64>, D::Error> {
    match Option::<Num>::deserialize(d)? {
        Some(n) => n.value().map(Some),
        None => Ok(None),
    }
}

#[derive(Deserialize, Debug)]
struct Content {
    #[serde(rename = "_content", default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct NumContent {
    #[serde(rename = "_content", default, deserialize_with = "de_u64")]
    content: u64,
}

#[derive(Deserialize, Debug)]
struct LoginEnvelope {
    user: LoginUser,
}

#[derive(Deserialize, Debug)]
struct LoginUser {
    id: String,
}

#[derive(Deserialize, Debug)]
struct PhotosEnvelope {
    photos: WirePage,
}

#[derive(Deserialize, Debug)]
struct PhotosetEnvelope {
    photoset: WirePage,
}

#[derive(Deserialize, Debug)]
struct WirePage {
    #[serde(default, deserialize_with = "de_u64")]
    pages: u64,
    #[serde(default, deserialize_with = "de_u64")]
    total: u64,
    title: Option<String>,
    #[serde(default)]
    photo: Vec<WirePhoto>,
}

#[derive(Deserialize, Debug)]
struct WirePhoto {
    id: String,
    datetaken: Option<String>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    datetakenunknown: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    dateupload: Option<u64>,
    media: Option<String>,
    originalformat: Option<String>,
}

impl From<WirePhoto> for PhotoRef {
    fn from(w: WirePhoto) -> Self {
        // when the capture date is unknown Flickr reports the upload date instead
        let taken_at = match w.datetakenunknown {
            Some(1) => None,
            _ => w
                .datetaken
                .as_deref()
                .and_then(|v| NaiveDateTime::parse_from_str(v, "%Y-%m-%d %H:%M:%S").ok()),
        };
        PhotoRef {
            id: w.id,
            taken_at,
            posted_at: w.dateupload.and_then(from_unix),
            media: match w.media.as_deref() {
                Some("video") => MediaType::Video,
                _ => MediaType::Photo,
            },
            original_format: w.originalformat,
        }
    }
}

#[derive(Deserialize, Debug)]
struct SizesEnvelope {
    sizes: SizeList,
}

#[derive(Deserialize, Debug)]
struct SizeList {
    #[serde(default)]
    size: Vec<WireSize>,
}

#[derive(Deserialize, Debug, Clone)]
struct WireSize {
    #[serde(default)]
    label: String,
    #[serde(deserialize_with = "de_u64")]
    width: u64,
    #[serde(deserialize_with = "de_u64")]
    height: u64,
    source: String,
    media: Option<String>,
}

impl SizesEnvelope {
    // 'Original' is not always offered, so pick by pixel count
    fn largest(self) -> Option<WireSize> {
        self.sizes
            .size
            .into_iter()
            .filter(|s| s.media.as_deref() != Some("video"))
            .max_by_key(|s| s.width * s.height)
            .inspect(|s| log::trace!("Largest size is {} ({}x{})", s.label, s.width, s.height))
    }
}

#[derive(Deserialize, Debug)]
struct ExifEnvelope {
    photo: ExifPhoto,
}

#[derive(Deserialize, Debug)]
struct ExifPhoto {
    #[serde(default)]
    camera: Option<String>,
    #[serde(default)]
    exif: Vec<ExifTag>,
}

#[derive(Deserialize, Debug)]
struct ExifTag {
    tag: String,
    raw: Content,
}

impl ExifEnvelope {
    fn camera_model(self) -> Option<String> {
        self.photo
            .exif
            .into_iter()
            .find(|t| t.tag == "Model")
            .and_then(|t| t.raw.content)
            .or(self.photo.camera)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Deserialize, Debug)]
struct PersonEnvelope {
    person: WirePerson,
}

#[derive(Deserialize, Debug)]
struct WirePerson {
    nsid: String,
    username: Content,
    realname: Option<Content>,
    profileurl: Option<Content>,
    photos: Option<WirePersonPhotos>,
}

#[derive(Deserialize, Debug)]
struct WirePersonPhotos {
    firstdatetaken: Option<Content>,
    firstdate: Option<Content>,
    count: Option<NumContent>,
}

impl From<WirePerson> for UserInfo {
    fn from(p: WirePerson) -> Self {
        let photos = p.photos;
        UserInfo {
            nsid: p.nsid,
            username: p.username.content.unwrap_or_default(),
            realname: p.realname.and_then(|c| c.content).filter(|v| !v.is_empty()),
            profile_url: p.profileurl.and_then(|c| c.content),
            photo_count: photos.as_ref().and_then(|v| v.count.as_ref()).map_or(0, |c| c.content),
            first_taken: photos
                .as_ref()
                .and_then(|v| v.firstdatetaken.as_ref())
                .and_then(|c| c.content.clone()),
            first_posted: photos
                .as_ref()
                .and_then(|v| v.firstdate.as_ref())
                .and_then(|c| c.content.as_deref())
                .and_then(|v| v.parse().ok())
                .and_then(from_unix),
        }
    }
}

#[derive(Deserialize, Debug)]
struct PhotosetsEnvelope {
    photosets: WirePhotosets,
}

#[derive(Deserialize, Debug)]
struct WirePhotosets {
    #[serde(default, deserialize_with = "de_u64")]
    pages: u64,
    #[serde(default)]
    photoset: Vec<WirePhotoset>,
}

#[derive(Deserialize, Debug)]
struct WirePhotoset {
    id: String,
    title: Content,
    #[serde(default, deserialize_with = "de_u64")]
    photos: u64,
    #[serde(default, deserialize_with = "de_u64")]
    videos: u64,
}

impl From<WirePhotoset> for Album {
    fn from(s: WirePhotoset) -> Self {
        Album {
            album_id: s.id,
            title: s.title.content.unwrap_or_default(),
            photo_count: s.photos,
            video_count: s.videos,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use chrono::NaiveDate;

    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn ok<T: DeserializeOwned>(body: &str) -> T {
        match parse_reply::<T>("test", body).unwrap() {
            ApiReply::Ok(v) => v,
            ApiReply::Failed { code, message } => panic!("unexpected failure {} {}", code, message),
        }
    }

    #[test]
    fn parses_search_page() {
        let body = r#"{"photos":{"page":1,"pages":3,"perpage":500,"total":1203,"photo":[
            {"id":"24553218561","owner":"1@N00","title":"a","datetaken":"2016-03-01 10:15:30","datetakenunknown":"0","dateupload":"1456794930","media":"photo","originalformat":"jpg"},
            {"id":"24553218562","owner":"1@N00","title":"b","datetaken":"2016-03-02 08:00:00","datetakenunknown":0,"dateupload":"1456894930","media":"video"}
        ]},"stat":"ok"}"#;
        let envelope: PhotosEnvelope = ok(body);
        assert_eq!(envelope.photos.pages, 3);
        assert_eq!(envelope.photos.total, 1203);

        let photos: Vec<PhotoRef> = envelope.photos.photo.into_iter().map(PhotoRef::from).collect();
        assert_eq!(photos[0].id, "24553218561");
        assert_eq!(photos[0].taken_at, Some(ts("2016-03-01 10:15:30")));
        assert!(photos[0].posted_at.is_some());
        assert_eq!(photos[0].original_format.as_deref(), Some("jpg"));
        assert!(!photos[0].is_video());
        assert!(photos[1].is_video());
        assert_eq!(photos[1].original_format, None);
    }

    #[test]
    fn parses_photoset_page_with_string_counts() {
        let body = r#"{"photoset":{"id":"72157626216528324","primary":"1","owner":"1@N00","ownername":"me",
            "photo":[{"id":"5","datetaken":"2015-01-01 00:00:00","datetakenunknown":"1","dateupload":"1420070400","media":"photo"}],
            "page":1,"per_page":"500","perpage":"500","pages":"1","title":"Trip: Seoul","total":"1"},"stat":"ok"}"#;
        let envelope: PhotosetEnvelope = ok(body);
        assert_eq!(envelope.photoset.pages, 1);
        assert_eq!(envelope.photoset.total, 1);
        assert_eq!(envelope.photoset.title.as_deref(), Some("Trip: Seoul"));

        let photo = PhotoRef::from(envelope.photoset.photo.into_iter().next().unwrap());
        // datetakenunknown means Flickr made the capture date up
        assert_eq!(photo.taken_at, None);
        assert!(photo.posted_at.is_some());
    }

    #[test]
    fn failure_reply_maps_to_error_kind() {
        let body = r#"{"stat":"fail","code":98,"message":"Invalid auth token"}"#;
        match parse_reply::<LoginEnvelope>("flickr.test.login", body).unwrap() {
            ApiReply::Failed { code, message } => {
                assert_eq!(code, 98);
                assert!(failure_to_error("flickr.test.login", code, &message).is_auth());
            }
            ApiReply::Ok(_) => panic!("expected failure"),
        }

        let err = failure_to_error("flickr.photos.search", 105, "Service currently unavailable");
        assert!(matches!(err, FlickrdError::RemoteApi(_)));
        assert!(err.to_string().contains("30 minutes"));

        assert!(parse_reply::<LoginEnvelope>("x", "<html>").is_err());
    }

    #[test]
    fn picks_largest_size() {
        let body = r#"{"sizes":{"canblog":0,"size":[
            {"label":"Square","width":75,"height":75,"source":"https://live.staticflickr.com/1/2_s.jpg","media":"photo"},
            {"label":"Original","width":"4000","height":"3000","source":"https://live.staticflickr.com/1/2_o.jpg","media":"photo"},
            {"label":"Large","width":"1024","height":"768","source":"https://live.staticflickr.com/1/2_b.jpg","media":"photo"}
        ]},"stat":"ok"}"#;
        let sizes: SizesEnvelope = ok(body);
        let largest = sizes.largest().unwrap();
        assert_eq!(largest.label, "Original");
        assert_eq!(largest.source, "https://live.staticflickr.com/1/2_o.jpg");
        assert_eq!((largest.width, largest.height), (4000, 3000));
    }

    #[test]
    fn camera_model_from_exif() {
        let body = r#"{"photo":{"id":"1","camera":"Fujifilm X100","exif":[
            {"tagspace":"IFD0","tag":"Make","label":"Make","raw":{"_content":"FUJIFILM"}},
            {"tagspace":"IFD0","tag":"Model","label":"Model","raw":{"_content":"X100 "}}
        ]},"stat":"ok"}"#;
        let exif: ExifEnvelope = ok(body);
        assert_eq!(exif.camera_model().as_deref(), Some("X100"));

        let exif: ExifEnvelope = ok(r#"{"photo":{"id":"1","exif":[]},"stat":"ok"}"#);
        assert_eq!(exif.camera_model(), None);
    }

    #[test]
    fn parses_user_and_albums() {
        let body = r#"{"person":{"id":"1@N00","nsid":"1@N00","username":{"_content":"me"},"realname":{"_content":"Me Myself"},
            "profileurl":{"_content":"https://www.flickr.com/people/me/"},
            "photos":{"firstdatetaken":{"_content":"2004-08-26 21:34:13"},"firstdate":{"_content":"1093566950"},"count":{"_content":2000}}},"stat":"ok"}"#;
        let user: UserInfo = ok::<PersonEnvelope>(body).person.into();
        assert_eq!(user.username, "me");
        assert_eq!(user.realname.as_deref(), Some("Me Myself"));
        assert_eq!(user.photo_count, 2000);
        assert_eq!(user.first_taken.as_deref(), Some("2004-08-26 21:34:13"));
        assert!(user.first_posted.is_some());

        let body = r#"{"photosets":{"page":1,"pages":1,"perpage":500,"total":1,"photoset":[
            {"id":"72157626216528324","photos":"12","videos":1,"title":{"_content":"Trip"},"description":{"_content":""}}]},"stat":"ok"}"#;
        let sets: PhotosetsEnvelope = ok(body);
        let albums: Vec<Album> = sets.photosets.photoset.into_iter().map(Album::from).collect();
        assert_eq!(
            albums,
            vec![Album {
                album_id: "72157626216528324".to_string(),
                title: "Trip".to_string(),
                photo_count: 12,
                video_count: 1
            }]
        );
    }

    #[test]
    fn taken_range_params_cover_whole_days() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2016, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2016, 5, 31),
        );
        let (method, params) = selection_params(&Selection::Taken(range), "1@N00", 2, 500);
        assert_eq!(method, "flickr.photos.search");
        assert!(params.contains(&("min_taken_date", "2016-01-01 00:00:00".to_string())));
        assert!(params.contains(&("max_taken_date", "2016-05-31 23:59:59".to_string())));
        assert!(params.contains(&("page", "2".to_string())));

        let (method, params) = selection_params(&Selection::Album("42".to_string()), "1@N00", 1, 1);
        assert_eq!(method, "flickr.photosets.getPhotos");
        assert!(params.contains(&("photoset_id", "42".to_string())));

        let (_, params) = selection_params(&Selection::Posted(range), "1@N00", 1, 500);
        let min: i64 = params.iter().find(|(k, _)| *k == "min_upload_date").unwrap().1.parse().unwrap();
        let max: i64 = params.iter().find(|(k, _)| *k == "max_upload_date").unwrap().1.parse().unwrap();
        assert!(max > min);
    }

    fn listed(id: String) -> PhotoRef {
        PhotoRef {
            id,
            taken_at: None,
            posted_at: None,
            media: MediaType::Photo,
            original_format: None,
        }
    }

    // Three pages of two photos each, remembering which pages were asked for
    fn three_pages(requested: &RefCell<Vec<u64>>) -> impl Stream<Item = Result<PhotoRef>> + '_ {
        paginate(move |page| {
            requested.borrow_mut().push(page);
            let photos = (1..=2).map(|n| listed(format!("{}-{}", page, n))).collect();
            async move {
                Ok(PhotoPage {
                    pages: 3,
                    total: 6,
                    title: None,
                    photos,
                })
            }
        })
    }

    #[tokio::test]
    async fn pages_are_fetched_lazily_and_restart_from_the_first() {
        let requested = RefCell::new(Vec::new());

        let listing = three_pages(&requested);
        futures::pin_mut!(listing);
        let first = listing.try_next().await.unwrap().unwrap();
        assert_eq!(first.id, "1-1");
        assert_eq!(*requested.borrow(), vec![1]);

        let rest: Vec<String> = listing.map_ok(|p| p.id).try_collect().await.unwrap();
        assert_eq!(rest, vec!["1-2", "2-1", "2-2", "3-1", "3-2"]);
        assert_eq!(*requested.borrow(), vec![1, 2, 3]);

        requested.borrow_mut().clear();
        let again: Vec<PhotoRef> = three_pages(&requested).try_collect().await.unwrap();
        assert_eq!(again.len(), 6);
        assert_eq!(again[0].id, "1-1");
        assert_eq!(*requested.borrow(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failed_page_ends_the_listing_with_its_error() {
        let listing = paginate(|page| async move {
            if page == 1 {
                Ok(PhotoPage {
                    pages: 2,
                    total: 2,
                    title: None,
                    photos: vec![listed("a".to_string())],
                })
            } else {
                Err(FlickrdError::RemoteApi("page 2 failed".to_string()))
            }
        });
        futures::pin_mut!(listing);
        assert_eq!(listing.try_next().await.unwrap().unwrap().id, "a");
        assert!(matches!(
            listing.try_next().await,
            Err(FlickrdError::RemoteApi(_))
        ));
    }

    #[test]
    fn progress_bar_follows_content_length() {
        let known = progress_bar(Some(2_900_000));
        assert_eq!(known.length(), Some(2_900_000));
        known.inc(1_200_000);
        assert_eq!(known.position(), 1_200_000);
        known.finish_and_clear();

        assert_eq!(progress_bar(None).length(), None);
    }
}
