//! Minimal Amazon S3 client for the bucket document source.
//!
//! Lists (`ListObjectsV2`, paginated) and downloads objects using the S3 REST
//! API with AWS Signature V4 authentication. Uses only pure-Rust signing
//! dependencies (`hmac`, `sha2`).
//!
//! With no custom endpoint, requests go to the virtual-hosted
//! `https://<bucket>.s3.<region>.amazonaws.com`. A configured `endpoint_url`
//! (MinIO, LocalStack) is addressed path-style: `<endpoint>/<bucket>/<key>`.
//!
//! # Authentication
//!
//! All requests are signed using
//! [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html):
//!
//! ```text
//! kDate    = HMAC("AWS4" + secret, dateStamp)
//! kRegion  = HMAC(kDate, region)
//! kService = HMAC(kRegion, "s3")
//! kSigning = HMAC(kService, "aws4_request")
//! ```

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::credentials::AwsCredentials;

type HmacSha256 = Hmac<Sha256>;

/// Metadata for a single S3 object, parsed from a `ListObjectsV2` response.
#[derive(Debug, Clone, PartialEq)]
pub struct S3Object {
    pub key: String,
    pub size: i64,
}

pub struct S3Client {
    bucket: String,
    creds: AwsCredentials,
    endpoint: Option<String>,
    client: reqwest::Client,
}

impl S3Client {
    pub fn new(bucket: &str, creds: AwsCredentials, endpoint_url: Option<String>) -> Self {
        Self {
            bucket: bucket.to_string(),
            creds,
            endpoint: endpoint_url.map(|e| e.trim_end_matches('/').to_string()),
            client: reqwest::Client::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Lists every object under `prefix`, following continuation tokens.
    /// "Directory" placeholder keys ending in `/` are skipped.
    pub async fn list_objects(&self, prefix: &str) -> Result<Vec<S3Object>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query_params = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !prefix.is_empty() {
                query_params.push(("prefix".to_string(), prefix.to_string()));
            }
            if let Some(ref token) = continuation_token {
                query_params.push(("continuation-token".to_string(), token.clone()));
            }

            // Canonical query string must be sorted
            query_params.sort_by(|a, b| a.0.cmp(&b.0));
            let canonical_querystring: String = query_params
                .iter()
                .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
                .collect::<Vec<_>>()
                .join("&");

            let resp = self
                .signed_get(&self.object_path(""), &canonical_querystring)?
                .send()
                .await
                .map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to list S3 objects in s3://{}/{}: {}",
                        self.bucket,
                        prefix,
                        e
                    )
                })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let xml_body = resp.text().await?;
            let (batch, is_truncated, next_token) = parse_list_objects_response(&xml_body);
            objects.extend(batch);

            match (is_truncated, next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        Ok(objects)
    }

    /// Downloads one object's bytes.
    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .signed_get(&self.object_path(key), "")?
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get s3://{}/{}: {}", self.bucket, key, e))?;

        if !resp.status().is_success() {
            bail!(
                "S3 GetObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            );
        }

        Ok(resp.bytes().await?.to_vec())
    }

    /// Canonical URI for `key` (empty key addresses the bucket).
    fn object_path(&self, key: &str) -> String {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match self.endpoint {
            Some(_) => format!("/{}/{}", uri_encode(&self.bucket), encoded_key),
            None => format!("/{}", encoded_key),
        }
    }

    fn host_and_base(&self) -> (String, String) {
        match &self.endpoint {
            Some(endpoint) => {
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .to_string();
                (host, endpoint.clone())
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.creds.region);
                (host.clone(), format!("https://{}", host))
            }
        }
    }

    /// Builds a SigV4-signed GET request.
    fn signed_get(&self, canonical_uri: &str, canonical_querystring: &str) -> Result<reqwest::RequestBuilder> {
        let (host, base) = self.host_and_base();
        let signed = sign_request(
            &self.creds,
            &host,
            canonical_uri,
            canonical_querystring,
            Utc::now(),
        )?;

        let url = if canonical_querystring.is_empty() {
            format!("{}{}", base, canonical_uri)
        } else {
            format!("{}{}?{}", base, canonical_uri, canonical_querystring)
        };

        let mut req_builder = self
            .client
            .get(&url)
            .header("Authorization", &signed.authorization)
            .header("x-amz-content-sha256", &signed.payload_hash)
            .header("x-amz-date", &signed.amz_date);

        if let Some(ref token) = self.creds.session_token {
            req_builder = req_builder.header("x-amz-security-token", token);
        }
        Ok(req_builder)
    }
}

struct SignedHeaders {
    authorization: String,
    payload_hash: String,
    amz_date: String,
}

fn sign_request(
    creds: &AwsCredentials,
    host: &str,
    canonical_uri: &str,
    canonical_querystring: &str,
    now: DateTime<Utc>,
) -> Result<SignedHeaders> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = hex_sha256(b"");

    let mut headers = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.clone()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "GET\n{}\n{}\n{}\n{}\n{}",
        canonical_uri, canonical_querystring, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, creds.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, &creds.region, "s3")?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    );

    Ok(SignedHeaders {
        authorization,
        payload_hash,
        amz_date,
    })
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| anyhow::anyhow!("HMAC key rejected: {}", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~` unescaped.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

/// Parses a `ListObjectsV2` body into objects, the truncation flag and the
/// next continuation token.
fn parse_list_objects_response(xml: &str) -> (Vec<S3Object>, bool, Option<String>) {
    let mut objects = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        remaining = &remaining[block_start + end + "</Contents>".len()..];

        let key = extract_xml_value(block, "Key")
            .map(|k| xml_unescape(&k))
            .unwrap_or_default();
        if key.is_empty() || key.ends_with('/') {
            continue;
        }
        let size = extract_xml_value(block, "Size")
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        objects.push(S3Object { key, size });
    }

    (objects, is_truncated, next_token)
}

fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let value_start = xml.find(&open)? + open.len();
    let end = xml[value_start..].find(&close)?;
    Some(xml[value_start..value_start + end].to_string())
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
