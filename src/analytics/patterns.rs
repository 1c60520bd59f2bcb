//! Issue categorization and OSI-layer attribution from tool usage

use super::models::IssueCategory;
use std::collections::HashMap;

/// Tool name → OSI layer
const TOOL_OSI_LAYERS: &[(&str, i64)] = &[
    // Layer 1 - Physical/Link
    ("check_adapter_status", 1),
    ("enable_wifi", 1),
    // Layer 3 - Network
    ("get_ip_config", 3),
    ("ping_gateway", 3),
    ("ping_dns", 3),
    ("renew_dhcp_lease", 3),
    // Layer 7 - Application
    ("test_dns_resolution", 7),
    ("flush_dns_cache", 7),
    ("kill_process", 7),
    ("clean_temp_files", 7),
];

/// Tool name → issue category
const TOOL_CATEGORIES: &[(&str, IssueCategory)] = &[
    ("enable_wifi", IssueCategory::Wifi),
    ("test_dns_resolution", IssueCategory::Dns),
    ("flush_dns_cache", IssueCategory::Dns),
    ("ping_gateway", IssueCategory::Gateway),
    ("ping_dns", IssueCategory::Connectivity),
    ("get_ip_config", IssueCategory::IpConfig),
    ("renew_dhcp_lease", IssueCategory::IpConfig),
    ("check_adapter_status", IssueCategory::Adapter),
];

pub fn osi_layer_for_tool(tool_name: &str) -> Option<i64> {
    TOOL_OSI_LAYERS
        .iter()
        .find(|(name, _)| *name == tool_name)
        .map(|(_, layer)| *layer)
}

pub fn category_for_tool(tool_name: &str) -> Option<IssueCategory> {
    TOOL_CATEGORIES
        .iter()
        .find(|(name, _)| *name == tool_name)
        .map(|(_, category)| *category)
}

/// Categorize a session from the tools it used: the most frequently used
/// category wins; sessions that used only uncategorized tools are `Other`.
pub fn categorize_by_tools(tools_used: &[String]) -> IssueCategory {
    if tools_used.is_empty() {
        return IssueCategory::Unknown;
    }

    let mut counts: HashMap<IssueCategory, usize> = HashMap::new();
    for tool in tools_used {
        if let Some(category) = category_for_tool(tool) {
            *counts.entry(category).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map_or(IssueCategory::Other, |(category, _)| category)
}

/// Lowest OSI layer touched by the tool sequence. Issues typically surface
/// bottom-up, so the lowest touched layer is taken as where the problem was.
pub fn lowest_osi_layer(tools_used: &[String]) -> Option<i64> {
    tools_used
        .iter()
        .filter_map(|t| osi_layer_for_tool(t))
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_categorize_empty() {
        assert_eq!(categorize_by_tools(&[]), IssueCategory::Unknown);
    }

    #[test]
    fn test_categorize_unmapped_tools() {
        assert_eq!(
            categorize_by_tools(&tools(&["kill_process"])),
            IssueCategory::Other
        );
    }

    #[test]
    fn test_categorize_majority_wins() {
        let used = tools(&["ping_gateway", "test_dns_resolution", "flush_dns_cache"]);
        assert_eq!(categorize_by_tools(&used), IssueCategory::Dns);
    }

    #[test]
    fn test_categorize_single_tool() {
        assert_eq!(
            categorize_by_tools(&tools(&["enable_wifi"])),
            IssueCategory::Wifi
        );
    }

    #[test]
    fn test_lowest_layer() {
        let used = tools(&["test_dns_resolution", "ping_gateway", "enable_wifi"]);
        assert_eq!(lowest_osi_layer(&used), Some(1));

        let network_only = tools(&["ping_gateway", "ping_dns"]);
        assert_eq!(lowest_osi_layer(&network_only), Some(3));

        assert_eq!(lowest_osi_layer(&[]), None);
        assert_eq!(lowest_osi_layer(&tools(&["not_a_tool"])), None);
    }
}
