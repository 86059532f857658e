//! Tests for parsing the execution tool's status document.

use aem_provision::status::parse_status;

const TWO_INSTANCES: &str = r"
data:
  instances:
    - id: publish
      url: http://127.0.0.1:4503
      aem_version: 6.5.17.0
      attributes: [running, up-to-date]
      run_modes: [publish, local]
      health_checks: [bundles, events]
      dir: /mnt/aemc/aem/home/var/instance/publish
    - id: author
      url: http://127.0.0.1:4502
      aem_version: 6.5.17.0
      attributes: [running]
      run_modes: [author]
      dir: /mnt/aemc/aem/home/var/instance/author
";

#[test]
fn instances_keep_reported_order_and_fields() {
    let status = parse_status(TWO_INSTANCES)
        .unwrap_or_else(|err| panic!("status should parse: {err}"));

    let ids: Vec<&str> = status
        .instances
        .iter()
        .map(|instance| instance.id.as_str())
        .collect();
    assert_eq!(ids, ["publish", "author"]);

    let publish = status
        .instance("publish")
        .unwrap_or_else(|| panic!("publish should be listed"));
    assert_eq!(publish.url, "http://127.0.0.1:4503");
    assert_eq!(publish.version, "6.5.17.0");
    assert_eq!(publish.directory, "/mnt/aemc/aem/home/var/instance/publish");
    assert!(publish.attributes.contains("up-to-date"));
    assert!(publish.run_modes.contains("publish"));
    assert_eq!(publish.health_checks, ["bundles", "events"]);

    let author = status
        .instance("author")
        .unwrap_or_else(|| panic!("author should be listed"));
    assert!(author.health_checks.is_empty());
}

#[test]
fn document_without_data_section_is_rejected() {
    let err = parse_status("instances: []\n").expect_err("data section is required");

    assert!(err.to_string().contains("unable to parse instance status"), "{err}");
}
