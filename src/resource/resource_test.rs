use serde_json::json;

use super::*;

#[test]
fn test_resource_version_number() {
    let mut meta = ObjectMeta::default();
    assert_eq!(meta.resource_version_number().unwrap(), 0);

    meta.resource_version = "42".to_string();
    assert_eq!(meta.resource_version_number().unwrap(), 42);

    meta.resource_version = "abc".to_string();
    assert!(meta.resource_version_number().is_err());
}

#[test]
fn test_owner_reference_group_version() {
    let owner = OwnerReference {
        api_version: "addon.open-cluster-management.io/v1alpha1".to_string(),
        kind: "ManagedClusterAddOn".to_string(),
        name: "addon1".to_string(),
        uid: "owner-1".to_string(),
        ..Default::default()
    };
    assert_eq!(
        owner.group_version(),
        ("addon.open-cluster-management.io", "v1alpha1")
    );

    let core = OwnerReference {
        api_version: "v1".to_string(),
        ..Default::default()
    };
    assert_eq!(core.group_version(), ("", "v1"));
}

#[test]
fn test_namespaced_name_display() {
    assert_eq!(NamespacedName::new("cluster1", "work1").to_string(), "cluster1/work1");
    assert_eq!(NamespacedName::new("", "cluster1").to_string(), "cluster1");
}

#[test]
fn test_status_hash_is_stable_and_sensitive() {
    let hash = generic_status_hash();
    let a = GenericResource::new("c1", "r1", "u1", 1).with_status(json!({"phase": "Applied"}));
    let b = GenericResource::new("c1", "r1", "u1", 2).with_status(json!({"phase": "Applied"}));
    let c = GenericResource::new("c1", "r1", "u1", 2).with_status(json!({"phase": "Failed"}));

    assert_eq!(hash(&a).unwrap(), hash(&b).unwrap());
    assert_ne!(hash(&a).unwrap(), hash(&c).unwrap());
    assert_eq!(hash(&a).unwrap().len(), 64);
}

#[test]
fn test_generic_resource_json_shape() {
    let resource = GenericResource::new("c1", "r1", "u1", 3).with_spec(json!({"replicas": 1}));
    let value = serde_json::to_value(&resource).unwrap();

    assert_eq!(value["metadata"]["resourceVersion"], "3");
    assert_eq!(value["spec"]["replicas"], 1);
    assert!(value.get("status").is_none());
}
