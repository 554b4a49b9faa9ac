//! Topological ordering over named dependency graphs.

use std::collections::{BTreeMap, HashMap};

/// Computes execution order as **layers** via Kahn's algorithm.
///
/// `nodes` maps each name to the names it depends on. Returns `Vec<layer>`
/// where each inner vector holds names with no remaining dependencies on
/// later layers; names within a layer are sorted, making the flattened order
/// deterministic. Reverse the layers for shutdown order.
///
/// Dependencies that name no node in the map are ignored here — callers
/// validate them up front with their own error types.
///
/// # Errors
///
/// Returns `Err(cycle_nodes)` when a dependency cycle is detected; the value
/// lists every node still inside the cycle.
pub fn topological_layers(
    nodes: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<Vec<String>>, Vec<String>> {
    // Build in-degree / dependents tables over known nodes only.
    let mut in_degree: HashMap<&str, usize> = nodes.keys().map(|n| (n.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> =
        nodes.keys().map(|n| (n.as_str(), Vec::new())).collect();

    for (name, deps) in nodes {
        for dep in deps {
            if dep == name || !nodes.contains_key(dep) {
                continue;
            }
            dependents.get_mut(dep.as_str()).unwrap().push(name);
            *in_degree.get_mut(name.as_str()).unwrap() += 1;
        }
    }

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<&str> = nodes
        .keys()
        .map(String::as_str)
        .filter(|n| in_degree[n] == 0)
        .collect();
    let mut processed = 0;

    while !current.is_empty() {
        current.sort_unstable();
        processed += current.len();
        let mut next: Vec<&str> = Vec::new();
        for name in &current {
            for dependent in &dependents[name] {
                let degree = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    next.push(dependent);
                }
            }
        }
        layers.push(current.iter().map(|s| s.to_string()).collect());
        current = next;
    }

    if processed != nodes.len() {
        let mut cycle: Vec<String> = nodes
            .keys()
            .filter(|n| in_degree[n.as_str()] > 0)
            .cloned()
            .collect();
        cycle.sort_unstable();
        return Err(cycle);
    }

    Ok(layers)
}

/// Collects every transitive dependent of `root` (excluding `root` itself).
pub fn transitive_dependents(nodes: &BTreeMap<String, Vec<String>>, root: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut frontier = vec![root.to_string()];
    while let Some(current) = frontier.pop() {
        for (name, deps) in nodes {
            if deps.contains(&current) && !out.contains(name) && name != root {
                out.push(name.clone());
                frontier.push(name.clone());
            }
        }
    }
    out.sort_unstable();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_linear_chain() {
        let nodes = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let layers = topological_layers(&nodes).unwrap();
        assert_eq!(layers, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_layer_is_alphabetical() {
        let nodes = graph(&[("z", &[]), ("a", &[]), ("m", &["a", "z"])]);
        let layers = topological_layers(&nodes).unwrap();
        assert_eq!(layers[0], vec!["a", "z"]);
        assert_eq!(layers[1], vec!["m"]);
    }

    #[test]
    fn test_cycle_detected() {
        let nodes = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);
        let cycle = topological_layers(&nodes).unwrap_err();
        assert_eq!(cycle, vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_deps_ignored() {
        let nodes = graph(&[("a", &["ghost"]), ("b", &["a"])]);
        let layers = topological_layers(&nodes).unwrap();
        assert_eq!(layers, vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_transitive_dependents() {
        let nodes = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"]), ("d", &[])]);
        assert_eq!(transitive_dependents(&nodes, "a"), vec!["b", "c"]);
        assert!(transitive_dependents(&nodes, "d").is_empty());
    }
}
