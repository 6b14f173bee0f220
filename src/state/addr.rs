/// Lookup key for a resource in state: `module|type|name`, with the module
/// segment omitted for the root module.
pub fn resource_key(module: &str, resource_type: &str, name: &str) -> String {
    if module.is_empty() {
        format!("{resource_type}|{name}")
    } else {
        format!("{module}|{resource_type}|{name}")
    }
}

/// Terraform state module address for a module call path: root is the empty
/// string, a nested call is `module.child.module.grand`.
pub fn module_path_to_string(path: &[String]) -> String {
    let mut out = String::new();
    for (i, p) in path.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str("module.");
        out.push_str(p);
    }
    out
}

/// Derive a provider address from a resource type by splitting on the first
/// underscore: `azurerm_kubernetes_cluster` becomes
/// `provider["registry.terraform.io/hashicorp/azurerm"]`. Unknown providers
/// still default to the hashicorp namespace.
pub fn provider_address_for_type(resource_type: &str) -> String {
    let prov = match resource_type.find('_') {
        Some(i) if i > 0 => &resource_type[..i],
        _ => resource_type,
    };
    format!("provider[\"registry.terraform.io/hashicorp/{prov}\"]")
}
