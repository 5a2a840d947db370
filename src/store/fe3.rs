//! FE3 delivery service client (SOAP SyncUpdates / GetExtendedUpdateInfo2)
//!
//! The delivery service speaks SOAP 1.2 and embeds the interesting payload
//! as escaped XML fragments inside the response. The client unescapes the
//! element brackets once and parses the whole body in a single pass,
//! building two side-tables the pipeline consumes:
//!
//! - `guid.ext → InstallerSpecificIdentifier` from every `<File>` node,
//! - `UpdateID → {PackageMoniker, Size, IsAppxFramework, PackageRank}`
//!   correlated through the inner numeric `<ID>` of each update block.
//!
//! The `<SecuredFragment>` walk (grandparent's first child is the
//! `<UpdateIdentity>`) mirrors the vendor response shape and must not be
//! "simplified" to a tag search; sibling fragments carry other identities.

use crate::auth::DeviceToken;
use crate::error::{Result, ToolkitError};
use crate::http::{expect_success, MsHttpClient};
use crate::store::models::{UpdateRecord, FE3_FILE_EXTENSIONS};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// FE3 secured client endpoint
const FE3_ENDPOINT: &str =
    "https://fe3.delivery.mp.microsoft.com/ClientWebService/client.asmx/secured";

/// SOAP action URI prefix for the client web service
const SOAP_ACTION_BASE: &str =
    "http://www.microsoft.com/SoftwareDistribution/Server/ClientWebService";

/// BlockMap stub URLs have exactly this length and are never real packages
const BLOCKMAP_URL_LENGTH: usize = 99;

/// Device attributes advertised to the delivery service
///
/// A desktop retail client requesting Store AppX content. The service keys
/// applicability off these values; the string is fixed per client version
/// and pre-escaped for embedding in the envelope.
const DEVICE_ATTRIBUTES: &str = "E:BranchReadinessLevel=CB&amp;CurrentBranch=ge_release&amp;\
OEMModel=Virtual&amp;FlightRing=Retail&amp;AttrDataVer=264&amp;InstallLanguage=en-US&amp;\
OSUILocale=en-US&amp;InstallationType=Client&amp;FlightingBranchName=&amp;OSSkuId=48&amp;\
App=WU_STORE&amp;ProcessorManufacturer=GenuineIntel&amp;AppVer=0.0.0.0&amp;\
OSArchitecture=AMD64&amp;IsFlightingEnabled=0&amp;TelemetryLevel=1&amp;\
DefaultUserRegion=244&amp;WuClientVer=10.0.19041.1023&amp;OSVersion=10.0.19041.1023&amp;\
DeviceFamily=Windows.Desktop";

/// One download URL paired with the update that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUrl {
    pub update_id: String,
    pub url: String,
}

/// Parsed SyncUpdates response
#[derive(Debug, Clone, Default)]
pub struct SyncUpdatesResponse {
    /// Update identities in response order
    pub update_ids: Vec<String>,
    /// Revision numbers, index-aligned with `update_ids`
    pub revision_ids: Vec<i32>,
    /// `<guid>.<ext>` (bare guid for cab) → real package moniker
    pub file_names: HashMap<String, String>,
    /// UpdateID → assembled update record
    pub updates: HashMap<String, UpdateRecord>,
}

/// Client for the FE3 delivery service
pub struct Fe3Client<'a> {
    http: &'a MsHttpClient,
}

impl<'a> Fe3Client<'a> {
    pub fn new(http: &'a MsHttpClient) -> Self {
        Self { http }
    }

    /// POST a SyncUpdates request for one update stream, returning raw XML
    pub fn sync_updates(&self, wu_category_id: &str, token: &DeviceToken) -> Result<String> {
        let envelope = build_sync_updates_envelope(wu_category_id, token);
        debug!(%wu_category_id, "posting SyncUpdates");
        let response = expect_success(self.http.post_soap(FE3_ENDPOINT, envelope)?)?;
        response.text().map_err(ToolkitError::from)
    }

    /// Resolve download URLs for each update identity, preserving order
    ///
    /// BlockMap stub URLs (always exactly 99 characters) are dropped.
    pub fn get_file_urls(
        &self,
        update_ids: &[String],
        revision_ids: &[i32],
        token: &DeviceToken,
    ) -> Result<Vec<FileUrl>> {
        let mut urls = Vec::new();
        for (update_id, revision_id) in update_ids.iter().zip(revision_ids.iter()) {
            let envelope = build_file_url_envelope(update_id, *revision_id, token);
            let response = expect_success(self.http.post_soap(FE3_ENDPOINT, envelope)?)?;
            let body = response.text().map_err(ToolkitError::from)?;
            for url in parse_file_locations(&body)? {
                urls.push(FileUrl {
                    update_id: update_id.clone(),
                    url,
                });
            }
        }
        Ok(urls)
    }
}

/// Parse a SyncUpdates response into identities and side-tables
pub fn parse_update_ids(raw_xml: &str) -> Result<SyncUpdatesResponse> {
    let unescaped = unescape_inner_xml(raw_xml);
    let document = roxmltree::Document::parse(&unescaped)?;

    let mut parsed = SyncUpdatesResponse::default();

    // Pass over every <File> node: FileName is "<guid>.<ext>", the real
    // moniker rides in InstallerSpecificIdentifier.
    for node in document
        .descendants()
        .filter(|n| n.has_tag_name("File"))
    {
        let (Some(file_name), Some(identifier)) = (
            node.attribute("FileName"),
            node.attribute("InstallerSpecificIdentifier"),
        ) else {
            continue;
        };
        let Some((stem, extension)) = file_name.rsplit_once('.') else {
            continue;
        };
        if !FE3_FILE_EXTENSIONS
            .iter()
            .any(|ext| extension.eq_ignore_ascii_case(ext))
        {
            continue;
        }
        let key = if extension.eq_ignore_ascii_case("cab") {
            stem.to_string()
        } else {
            file_name.to_string()
        };
        parsed.file_names.insert(key, identifier.to_string());
    }

    // SecuredFragment walk: the grandparent's first element child is the
    // UpdateIdentity whose attributes are collected in response order.
    for node in document
        .descendants()
        .filter(|n| n.has_tag_name("SecuredFragment"))
    {
        let Some(identity) = node
            .parent()
            .and_then(|p| p.parent())
            .and_then(|gp| gp.first_element_child())
        else {
            continue;
        };
        if !identity.has_tag_name("UpdateIdentity") {
            continue;
        }
        let (Some(update_id), Some(revision)) = (
            identity.attribute("UpdateID"),
            identity.attribute("RevisionNumber"),
        ) else {
            continue;
        };
        let Ok(revision_id) = revision.parse::<i32>() else {
            continue;
        };
        parsed.update_ids.push(update_id.to_string());
        parsed.revision_ids.push(revision_id);
    }

    // NewUpdates blocks: inner numeric <ID> → UpdateIdentity, plus any
    // Properties/Files the block already carries.
    let mut inner_id_map: HashMap<String, String> = HashMap::new();
    for node in document
        .descendants()
        .filter(|n| n.has_tag_name("UpdateInfo"))
    {
        let Some(inner_id) = child_text(&node, "ID") else {
            continue;
        };
        let Some(identity) = node
            .descendants()
            .find(|n| n.has_tag_name("UpdateIdentity"))
        else {
            continue;
        };
        let Some(update_id) = identity.attribute("UpdateID") else {
            continue;
        };
        inner_id_map.insert(inner_id, update_id.to_string());

        let record = parsed
            .updates
            .entry(update_id.to_string())
            .or_insert_with(|| new_record(update_id, &identity));
        absorb_update_details(&node, record);
    }

    // ExtendedUpdateInfo blocks: keyed by the same inner <ID>, carrying
    // the file size and AppxMetadata package moniker.
    for node in document
        .descendants()
        .filter(|n| n.has_tag_name("Update") && n.parent().is_some_and(|p| p.has_tag_name("Updates")))
    {
        let Some(inner_id) = child_text(&node, "ID") else {
            continue;
        };
        let Some(update_id) = inner_id_map.get(&inner_id) else {
            continue;
        };
        let record = parsed
            .updates
            .entry(update_id.clone())
            .or_insert_with(UpdateRecord::default);
        if record.update_id.is_empty() {
            record.update_id = update_id.clone();
            record.package_rank = UpdateRecord::DEFAULT_PACKAGE_RANK;
        }
        absorb_update_details(&node, record);
    }

    Ok(parsed)
}

/// Extract `<FileLocation><Url>` texts from a GetExtendedUpdateInfo2 body
fn parse_file_locations(raw_xml: &str) -> Result<Vec<String>> {
    let unescaped = unescape_inner_xml(raw_xml);
    let document = roxmltree::Document::parse(&unescaped)?;
    let mut urls = Vec::new();
    for node in document
        .descendants()
        .filter(|n| n.has_tag_name("FileLocation"))
    {
        let Some(url) = child_text(&node, "Url") else {
            continue;
        };
        if url.len() != BLOCKMAP_URL_LENGTH {
            urls.push(url);
        }
    }
    Ok(urls)
}

fn new_record(update_id: &str, identity: &roxmltree::Node<'_, '_>) -> UpdateRecord {
    UpdateRecord {
        update_id: update_id.to_string(),
        revision_id: identity
            .attribute("RevisionNumber")
            .and_then(|r| r.parse().ok())
            .unwrap_or_default(),
        package_rank: UpdateRecord::DEFAULT_PACKAGE_RANK,
        ..UpdateRecord::default()
    }
}

/// Merge Properties / ExtendedProperties / File details into a record
fn absorb_update_details(container: &roxmltree::Node<'_, '_>, record: &mut UpdateRecord) {
    for node in container.descendants() {
        if node.has_tag_name("Properties") || node.has_tag_name("ExtendedProperties") {
            if let Some(rank) = node.attribute("PackageRank").and_then(|r| r.parse().ok()) {
                record.package_rank = rank;
            }
            if let Some(framework) = node.attribute("IsAppxFramework") {
                record.is_framework = framework.eq_ignore_ascii_case("true");
            }
        } else if node.has_tag_name("File") {
            if let Some(size) = node.attribute("Size").and_then(|s| s.parse().ok()) {
                record.size = Some(size);
            }
            if let Some(file_name) = node.attribute("FileName") {
                record.file_guid_with_ext = Some(file_name.to_string());
            }
            if let Some(identifier) = node.attribute("InstallerSpecificIdentifier") {
                record.installer_specific_identifier = Some(identifier.to_string());
                if record.package_moniker.is_none() {
                    record.package_moniker = Some(identifier.to_string());
                }
            }
            if let Some(moniker) = node
                .children()
                .find(|c| c.has_tag_name("AppxMetadata"))
                .and_then(|m| m.attribute("PackageMoniker"))
            {
                record.package_moniker = Some(moniker.to_string());
            }
        }
    }
}

fn child_text(node: &roxmltree::Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|c| c.has_tag_name(tag))
        .and_then(|c| c.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Unescape the double-encoded element brackets of an FE3 response
///
/// Only `&lt;`/`&gt;` are rewritten; `&amp;` stays encoded so attribute
/// and text values (download URLs carry query strings) remain valid XML
/// for the parser, which decodes them on read.
fn unescape_inner_xml(raw: &str) -> String {
    raw.replace("&lt;", "<").replace("&gt;", ">")
}

/// Render `SystemTime` as the `yyyy-mm-ddThh:mm:ssZ` the service expects
fn format_soap_timestamp(time: SystemTime) -> String {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let days = secs.div_euclid(86_400);
    let seconds_of_day = secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}Z",
        seconds_of_day / 3600,
        (seconds_of_day % 3600) / 60,
        seconds_of_day % 60
    )
}

/// Gregorian date from days since the Unix epoch
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = if month <= 2 { year + 1 } else { year };
    (year, month, day)
}

/// SOAP security header shared by both operations
fn security_header(token: &DeviceToken) -> String {
    let created = format_soap_timestamp(SystemTime::now());
    let expires = format_soap_timestamp(SystemTime::now() + Duration::from_secs(300));
    format!(
        r#"<o:Security s:mustUnderstand="1" xmlns:o="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">
      <Timestamp xmlns="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">
        <Created>{created}</Created>
        <Expires>{expires}</Expires>
      </Timestamp>
      <wuws:WindowsUpdateTicketsToken wsu:id="ClientMSA" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd" xmlns:wuws="http://schemas.microsoft.com/msus/2014/10/WindowsUpdateAuthorization">
        <TicketType Name="MSA" Version="1.0" Policy="MBI_SSL">{device}</TicketType>
      </wuws:WindowsUpdateTicketsToken>
    </o:Security>"#,
        device = token.as_str()
    )
}

/// SyncUpdates request envelope for one `WuCategoryId` update stream
fn build_sync_updates_envelope(wu_category_id: &str, token: &DeviceToken) -> String {
    format!(
        r#"<s:Envelope xmlns:a="http://www.w3.org/2005/08/addressing" xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Header>
    <a:Action s:mustUnderstand="1">{SOAP_ACTION_BASE}/SyncUpdates</a:Action>
    <a:MessageID>urn:uuid:{message_id}</a:MessageID>
    <a:To s:mustUnderstand="1">{FE3_ENDPOINT}</a:To>
    {security}
  </s:Header>
  <s:Body>
    <SyncUpdates xmlns="{SOAP_ACTION_BASE}">
      <cookie>
        <Expiration>2045-01-01T00:00:00Z</Expiration>
        <EncryptedData></EncryptedData>
      </cookie>
      <parameters>
        <ExpressQuery>false</ExpressQuery>
        <InstalledNonLeafUpdateIDs></InstalledNonLeafUpdateIDs>
        <SkipSoftwareSync>false</SkipSoftwareSync>
        <NeedTwoGroupOutOfScopeUpdates>true</NeedTwoGroupOutOfScopeUpdates>
        <FilterAppCategoryIds>
          <CategoryIdentifier>
            <Id>{wu_category_id}</Id>
          </CategoryIdentifier>
        </FilterAppCategoryIds>
        <TreatAppCategoryIdsAsInstalled>true</TreatAppCategoryIdsAsInstalled>
        <AlsoPerformRegularSync>false</AlsoPerformRegularSync>
        <ComputerSpec/>
        <ExtendedUpdateInfoParameters>
          <XmlUpdateFragmentTypes>
            <XmlUpdateFragmentType>Extended</XmlUpdateFragmentType>
            <XmlUpdateFragmentType>LocalizedProperties</XmlUpdateFragmentType>
            <XmlUpdateFragmentType>Eula</XmlUpdateFragmentType>
          </XmlUpdateFragmentTypes>
          <Locales>
            <string>en-US</string>
            <string>en</string>
          </Locales>
        </ExtendedUpdateInfoParameters>
        <ClientPreferredLanguages/>
        <ProductsParameters>
          <SyncCurrentVersionOnly>false</SyncCurrentVersionOnly>
          <DeviceAttributes>{DEVICE_ATTRIBUTES}</DeviceAttributes>
          <CallerAttributes>E:Interactive=1&amp;IsSeeker=1&amp;SheddingAware=1&amp;</CallerAttributes>
          <Products/>
        </ProductsParameters>
      </parameters>
    </SyncUpdates>
  </s:Body>
</s:Envelope>"#,
        message_id = uuid::Uuid::new_v4(),
        security = security_header(token),
    )
}

/// GetExtendedUpdateInfo2 request envelope for one update identity
fn build_file_url_envelope(update_id: &str, revision_id: i32, token: &DeviceToken) -> String {
    format!(
        r#"<s:Envelope xmlns:a="http://www.w3.org/2005/08/addressing" xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Header>
    <a:Action s:mustUnderstand="1">{SOAP_ACTION_BASE}/GetExtendedUpdateInfo2</a:Action>
    <a:MessageID>urn:uuid:{message_id}</a:MessageID>
    <a:To s:mustUnderstand="1">{FE3_ENDPOINT}</a:To>
    {security}
  </s:Header>
  <s:Body>
    <GetExtendedUpdateInfo2 xmlns="{SOAP_ACTION_BASE}">
      <updateIDs>
        <UpdateIdentity>
          <UpdateID>{update_id}</UpdateID>
          <RevisionNumber>{revision_id}</RevisionNumber>
        </UpdateIdentity>
      </updateIDs>
      <infoTypes>
        <XmlUpdateFragmentType>FileUrl</XmlUpdateFragmentType>
        <XmlUpdateFragmentType>FileDecryption</XmlUpdateFragmentType>
      </infoTypes>
      <deviceAttributes>{DEVICE_ATTRIBUTES}</deviceAttributes>
    </GetExtendedUpdateInfo2>
  </s:Body>
</s:Envelope>"#,
        message_id = uuid::Uuid::new_v4(),
        security = security_header(token),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYNC_FIXTURE: &str = r#"<root>
      <NewUpdates>
        <UpdateInfo>
          <ID>101</ID>
          <Deployment>
            <UpdateIdentity UpdateID="aaaa-1111" RevisionNumber="1"/>
            <Properties PackageRank="30000"/>
            <Fragment>
              <SecuredFragment>s</SecuredFragment>
            </Fragment>
          </Deployment>
        </UpdateInfo>
        <UpdateInfo>
          <ID>102</ID>
          <Deployment>
            <UpdateIdentity UpdateID="bbbb-2222" RevisionNumber="2"/>
            <Properties PackageRank="50"/>
            <Fragment>
              <SecuredFragment>s</SecuredFragment>
            </Fragment>
          </Deployment>
        </UpdateInfo>
      </NewUpdates>
      <FileLocations>
        <File FileName="11112222-aaaa-bbbb-cccc-dddd00000001.msixbundle" InstallerSpecificIdentifier="Contoso.App_1.2.3.4_x64__pub"/>
        <File FileName="11112222-aaaa-bbbb-cccc-dddd00000002.cab" InstallerSpecificIdentifier="Contoso.Framework_2.0.0.0_x64__pub"/>
        <File FileName="ignored.exe" InstallerSpecificIdentifier="nope"/>
      </FileLocations>
      <ExtendedUpdateInfo>
        <Updates>
          <Update>
            <ID>101</ID>
            <Xml>
              <ExtendedProperties IsAppxFramework="false"/>
              <Files>
                <File FileName="11112222-aaaa-bbbb-cccc-dddd00000001.msixbundle" Size="123456">
                  <AppxMetadata PackageMoniker="Contoso.App_1.2.3.4_x64__pub"/>
                </File>
              </Files>
            </Xml>
          </Update>
          <Update>
            <ID>102</ID>
            <Xml>
              <ExtendedProperties IsAppxFramework="true"/>
              <Files>
                <File FileName="11112222-aaaa-bbbb-cccc-dddd00000002.cab" Size="777">
                  <AppxMetadata PackageMoniker="Contoso.Framework_2.0.0.0_x64__pub"/>
                </File>
              </Files>
            </Xml>
          </Update>
        </Updates>
      </ExtendedUpdateInfo>
    </root>"#;

    #[test]
    fn test_parse_update_identities_in_order() {
        let parsed = parse_update_ids(SYNC_FIXTURE).unwrap();
        assert_eq!(parsed.update_ids, vec!["aaaa-1111", "bbbb-2222"]);
        assert_eq!(parsed.revision_ids, vec![1, 2]);
    }

    #[test]
    fn test_file_name_map_with_cab_key() {
        let parsed = parse_update_ids(SYNC_FIXTURE).unwrap();
        assert_eq!(
            parsed.file_names["11112222-aaaa-bbbb-cccc-dddd00000001.msixbundle"],
            "Contoso.App_1.2.3.4_x64__pub"
        );
        // cab entries are keyed by the bare guid
        assert_eq!(
            parsed.file_names["11112222-aaaa-bbbb-cccc-dddd00000002"],
            "Contoso.Framework_2.0.0.0_x64__pub"
        );
        assert!(!parsed.file_names.contains_key("ignored.exe"));
    }

    #[test]
    fn test_update_records_merged_across_sections() {
        let parsed = parse_update_ids(SYNC_FIXTURE).unwrap();
        let main = &parsed.updates["aaaa-1111"];
        assert_eq!(main.package_rank, 30000);
        assert!(!main.is_framework);
        assert_eq!(main.size, Some(123456));
        assert_eq!(
            main.package_moniker.as_deref(),
            Some("Contoso.App_1.2.3.4_x64__pub")
        );

        let framework = &parsed.updates["bbbb-2222"];
        assert!(framework.is_framework);
        assert_eq!(framework.package_rank, 50);
    }

    #[test]
    fn test_parse_escaped_inner_xml() {
        let escaped = SYNC_FIXTURE
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        let wrapper = format!("<Envelope><Body>{escaped}</Body></Envelope>");
        let parsed = parse_update_ids(&wrapper).unwrap();
        assert_eq!(parsed.update_ids.len(), 2);
        assert_eq!(parsed.file_names.len(), 2);
    }

    #[test]
    fn test_file_locations_filter_blockmap_stubs() {
        let stub = "x".repeat(BLOCKMAP_URL_LENGTH);
        let body = format!(
            "<r><FileLocation><Url>http://tlu.dl.delivery.mp.microsoft.com/real1</Url></FileLocation>\
             <FileLocation><Url>{stub}</Url></FileLocation>\
             <FileLocation><Url>http://tlu.dl.delivery.mp.microsoft.com/real2</Url></FileLocation></r>"
        );
        let urls = parse_file_locations(&body).unwrap();
        assert_eq!(
            urls,
            vec![
                "http://tlu.dl.delivery.mp.microsoft.com/real1".to_string(),
                "http://tlu.dl.delivery.mp.microsoft.com/real2".to_string()
            ]
        );
    }

    #[test]
    fn test_envelope_embeds_token_and_category() {
        let token = DeviceToken::from_raw_for_tests("<Device>abc</Device>");
        let envelope = build_sync_updates_envelope("cat-id-1", &token);
        assert!(envelope.contains("<Device>abc</Device>"));
        assert!(envelope.contains("<Id>cat-id-1</Id>"));
        assert!(envelope.contains("SyncUpdates"));
    }

    #[test]
    fn test_soap_timestamp_format() {
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(format_soap_timestamp(t), "2023-11-14T22:13:20Z");
    }
}
