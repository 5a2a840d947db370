//! Integration tests for the Store resolution chain
//!
//! Drives the FE3 response parser and the pipeline's pure resolution steps
//! end to end over a captured-shape SOAP fixture; no network involved.

use mstoolkit::platform::{ArchSelection, ArchitecturePreference};
use mstoolkit::store::pipeline::{
    dedup_packages, filter_packages_by_architecture, keep_latest_versions, label_installed,
    resolve_packages,
};
use mstoolkit::store::{parse_update_ids, FileUrl};

/// A SyncUpdates response in the shape the delivery service produces:
/// identities behind SecuredFragment nodes, files with installer-specific
/// identifiers, and extended info carrying sizes and monikers.
const SYNC_RESPONSE: &str = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Body>
    <SyncUpdatesResponse>
      <SyncUpdatesResult>
        <NewUpdates>
          <UpdateInfo>
            <ID>1</ID>
            <Deployment>
              <UpdateIdentity UpdateID="11111111-aaaa-0000-0000-000000000001" RevisionNumber="1"/>
              <Properties PackageRank="30000"/>
              <Wrap><SecuredFragment>f</SecuredFragment></Wrap>
            </Deployment>
          </UpdateInfo>
          <UpdateInfo>
            <ID>2</ID>
            <Deployment>
              <UpdateIdentity UpdateID="22222222-bbbb-0000-0000-000000000002" RevisionNumber="3"/>
              <Properties PackageRank="25"/>
              <Wrap><SecuredFragment>f</SecuredFragment></Wrap>
            </Deployment>
          </UpdateInfo>
        </NewUpdates>
        <ExtendedUpdateInfo>
          <Updates>
            <Update>
              <ID>1</ID>
              <Xml>
                <ExtendedProperties IsAppxFramework="false"/>
                <Files>
                  <File FileName="abcd0001-0000-0000-0000-00000000000a.msixbundle"
                        InstallerSpecificIdentifier="Contoso.Notes_4.1.0.0_x64__pub123"
                        Size="2048">
                    <AppxMetadata PackageMoniker="Contoso.Notes_4.1.0.0_x64__pub123"/>
                  </File>
                </Files>
              </Xml>
            </Update>
            <Update>
              <ID>2</ID>
              <Xml>
                <ExtendedProperties IsAppxFramework="true"/>
                <Files>
                  <File FileName="abcd0002-0000-0000-0000-00000000000b.appx"
                        InstallerSpecificIdentifier="Microsoft.VCLibs_14.0.30704.0_x64__8wekyb3d8bbwe"
                        Size="1024">
                    <AppxMetadata PackageMoniker="Microsoft.VCLibs_14.0.30704.0_x64__8wekyb3d8bbwe"/>
                  </File>
                </Files>
              </Xml>
            </Update>
          </Updates>
        </ExtendedUpdateInfo>
      </SyncUpdatesResult>
    </SyncUpdatesResponse>
  </s:Body>
</s:Envelope>"#;

fn file_urls() -> Vec<FileUrl> {
    vec![
        FileUrl {
            update_id: "11111111-aaaa-0000-0000-000000000001".to_string(),
            url: "http://tlu.dl.delivery.mp.microsoft.com/filestreamingservice/files/abcd0001-0000-0000-0000-00000000000a?P1=sig".to_string(),
        },
        FileUrl {
            update_id: "22222222-bbbb-0000-0000-000000000002".to_string(),
            url: "http://tlu.dl.delivery.mp.microsoft.com/filestreamingservice/files/abcd0002-0000-0000-0000-00000000000b?P1=sig".to_string(),
        },
    ]
}

#[test]
fn test_msix_product_with_dependency_scenario() {
    let sync = parse_update_ids(SYNC_RESPONSE).unwrap();
    assert_eq!(sync.update_ids.len(), 2);
    assert_eq!(sync.revision_ids, vec![1, 3]);

    let packages = resolve_packages(&file_urls(), &sync);
    let packages = dedup_packages(packages);
    assert!(!packages.is_empty());

    // Exactly one main package; every file name carries an AppX extension.
    assert_eq!(packages.iter().filter(|p| p.is_main_package).count(), 1);
    let extensions = [".msixbundle", ".appxbundle", ".msix", ".appx", ".emsix", ".eappx"];
    for package in &packages {
        assert!(extensions.iter().any(|ext| package.file_name.ends_with(ext)));
        assert!(!package.file_name.contains('/'));
    }

    // The framework dependency resolved to its real moniker name.
    let dependency = packages.iter().find(|p| !p.is_main_package).unwrap();
    assert_eq!(
        dependency.file_name,
        "Microsoft.VCLibs_14.0.30704.0_x64__8wekyb3d8bbwe.appx"
    );
    assert_eq!(dependency.size, Some(1024));
}

#[test]
fn test_escaped_response_parses_identically() {
    // The live service double-encodes the inner XML fragments.
    let escaped = {
        let inner = SYNC_RESPONSE.replace('<', "&lt;").replace('>', "&gt;");
        format!("<Envelope><Body>{inner}</Body></Envelope>")
    };
    let direct = parse_update_ids(SYNC_RESPONSE).unwrap();
    let from_escaped = parse_update_ids(&escaped).unwrap();
    assert_eq!(direct.update_ids, from_escaped.update_ids);
    assert_eq!(direct.file_names, from_escaped.file_names);
}

#[test]
fn test_full_filter_chain_keeps_install_set_minimal() {
    let sync = parse_update_ids(SYNC_RESPONSE).unwrap();
    let preference = ArchitecturePreference {
        primary: "x64".to_string(),
        fallback: vec!["x86".to_string()],
    };

    // Duplicate URLs simulate retried GetExtendedUpdateInfo2 rounds.
    let mut urls = file_urls();
    urls.extend(file_urls());

    let packages = resolve_packages(&urls, &sync);
    let packages = dedup_packages(packages);
    let packages =
        filter_packages_by_architecture(packages, &ArchSelection::Autodetect, &preference);
    let packages = keep_latest_versions(packages);
    let packages = label_installed(packages, &[]);

    assert_eq!(packages.len(), 2);
    assert_eq!(packages.iter().filter(|p| p.is_main_package).count(), 1);
    assert!(packages.iter().all(|p| !p.installed));

    let total: i64 = packages.iter().filter_map(|p| p.size).sum();
    assert_eq!(total, 2048 + 1024);
}

#[test]
fn test_exact_architecture_filter() {
    let sync = parse_update_ids(SYNC_RESPONSE).unwrap();
    let packages = resolve_packages(&file_urls(), &sync);
    let preference = ArchitecturePreference {
        primary: "x64".to_string(),
        fallback: vec![],
    };

    let arm = filter_packages_by_architecture(
        packages.clone(),
        &ArchSelection::Exact("arm64".to_string()),
        &preference,
    );
    assert!(arm.is_empty());

    let all = filter_packages_by_architecture(packages, &ArchSelection::All, &preference);
    assert_eq!(all.len(), 2);
}
