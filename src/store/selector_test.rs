use super::*;
use crate::Error;
use crate::ObjectMeta;

fn meta(labels: &[(&str, &str)]) -> ObjectMeta {
    ObjectMeta {
        uid: "uid-1".to_string(),
        name: "web-1".to_string(),
        namespace: "cluster1".to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ..Default::default()
    }
}

#[test]
fn test_empty_selectors_match_everything() {
    let compiled = ListSelectors::everything().compile().unwrap();
    assert!(compiled.matches(&meta(&[])));
    assert!(LabelSelector::parse("").unwrap().is_empty());
}

#[test]
fn test_label_equality_terms() {
    let m = meta(&[("app", "web"), ("tier", "frontend")]);

    assert!(LabelSelector::parse("app=web").unwrap().matches(&m));
    assert!(LabelSelector::parse("app==web,tier=frontend").unwrap().matches(&m));
    assert!(!LabelSelector::parse("app=db").unwrap().matches(&m));
    assert!(LabelSelector::parse("app!=db").unwrap().matches(&m));
    assert!(LabelSelector::parse("missing!=x").unwrap().matches(&m));
}

#[test]
fn test_label_set_and_existence_terms() {
    let m = meta(&[("app", "web"), ("example.com/role", "edge")]);

    assert!(LabelSelector::parse("app in (db, web)").unwrap().matches(&m));
    assert!(!LabelSelector::parse("app notin (web)").unwrap().matches(&m));
    assert!(LabelSelector::parse("app, example.com/role").unwrap().matches(&m));
    assert!(LabelSelector::parse("!missing").unwrap().matches(&m));
    assert!(!LabelSelector::parse("!app").unwrap().matches(&m));
}

#[test]
fn test_field_selector_terms() {
    let m = meta(&[]);

    assert!(FieldSelector::parse("metadata.name=web-1").unwrap().matches(&m));
    assert!(FieldSelector::parse("metadata.namespace==cluster1,metadata.uid!=other")
        .unwrap()
        .matches(&m));
    assert!(!FieldSelector::parse("metadata.name!=web-1").unwrap().matches(&m));
}

#[test]
fn test_invalid_selectors_are_rejected() {
    for selector in ["app in (web", "app)", "=web", "app in ()"] {
        let result = LabelSelector::parse(selector);
        assert!(
            matches!(result, Err(Error::Store(StoreError::InvalidSelector { .. }))),
            "{selector:?} should be rejected"
        );
    }

    assert!(FieldSelector::parse("spec.replicas=1").is_err());
    assert!(FieldSelector::parse("metadata.name").is_err());
}

#[test]
fn test_compiled_selectors_combine_labels_and_fields() {
    let compiled = ListSelectors::everything()
        .with_labels("app=web")
        .with_fields("metadata.namespace=cluster1")
        .compile()
        .unwrap();
    assert!(compiled.matches(&meta(&[("app", "web")])));

    let mut other = meta(&[("app", "web")]);
    other.namespace = "cluster2".to_string();
    assert!(!compiled.matches(&other));
}
