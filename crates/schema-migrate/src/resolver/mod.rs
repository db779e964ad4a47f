//! Dependency ordering of schema objects.
//!
//! Objects are nodes in an index-based graph with one edge
//! `dependency -> dependent` per declared reference. The order is produced by
//! Kahn's algorithm; ties between ready nodes are broken by kind priority,
//! then name, so the same input always yields the same order.
//!
//! When the remaining nodes all wait on each other, the resolver looks for a
//! foreign key on the cycle, removes that edge, strips the clause from the
//! owning table and emits it later as an `ALTER TABLE ... ADD CONSTRAINT`
//! item. Deferred constraints run after every other object. A cycle with no
//! foreign key to defer is a [`MigrateError::Cycle`].

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::{ForeignKeyRef, ObjectDescriptor, ObjectKind, ObjectRef};
use crate::error::{MigrateError, Result};

/// An object in execution order.
#[derive(Debug, Clone)]
pub struct ResolvedObject {
    pub descriptor: ObjectDescriptor,
    /// Notes added while ordering (e.g. a foreign key moved out).
    pub notes: Vec<String>,
    /// True for constraint-only items split off to break a cycle.
    pub deferred: bool,
}

/// A cycle that was broken by deferring foreign keys.
#[derive(Debug, Clone, Serialize)]
pub struct BrokenCycle {
    /// Objects on the cycle, starting at the referenced table.
    pub objects: Vec<ObjectRef>,
    /// Constraint items created for the deferred foreign keys, one per
    /// constraint between the two tables of the broken edge.
    pub deferred_constraints: Vec<ObjectRef>,
}

/// A reference to an object that is not part of the input set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalReference {
    pub from: ObjectRef,
    pub to: ObjectRef,
}

/// Output of [`DependencyResolver::resolve`].
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub objects: Vec<ResolvedObject>,
    pub broken_cycles: Vec<BrokenCycle>,
    pub external_references: Vec<ExternalReference>,
}

impl Resolution {
    /// Descriptors in execution order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ObjectDescriptor> {
        self.objects.iter().map(|o| &o.descriptor)
    }
}

/// Computes a dependency-correct execution order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Order `descriptors` so that every object follows the objects it references.
    pub fn resolve(&self, descriptors: Vec<ObjectDescriptor>) -> Result<Resolution> {
        let mut graph = Graph::build(descriptors);
        let n = graph.nodes.len();

        let mut emitted = vec![false; n];
        let mut order: Vec<usize> = Vec::with_capacity(n);
        let mut notes: Vec<Vec<String>> = vec![Vec::new(); n];
        let mut deferred: Vec<ResolvedObject> = Vec::new();
        let mut broken_cycles = Vec::new();

        let mut ready: BTreeSet<ReadyKey> = (0..n)
            .filter(|&i| graph.indegree[i] == 0)
            .map(|i| graph.ready_key(i))
            .collect();

        while order.len() < n {
            if let Some(key) = ready.pop_first() {
                let i = key.4;
                emitted[i] = true;
                order.push(i);
                for e in graph.outgoing[i].clone() {
                    let edge = &graph.edges[e];
                    if !edge.active {
                        continue;
                    }
                    let to = edge.to;
                    graph.indegree[to] -= 1;
                    if graph.indegree[to] == 0 {
                        ready.insert(graph.ready_key(to));
                    }
                }
                continue;
            }

            let alive: Vec<bool> = emitted.iter().map(|done| !done).collect();
            let Some(deferral) = graph.find_deferrable(&alive) else {
                let objects = graph.cycle_participants(&alive);
                warn!("Unbreakable dependency cycle among {} objects", objects.len());
                return Err(MigrateError::Cycle { objects });
            };

            let cycle_refs: Vec<ObjectRef> = deferral
                .cycle
                .iter()
                .map(|&i| graph.nodes[i].object_ref())
                .collect();
            let cycle_text = cycle_refs
                .iter()
                .map(|r| r.qualified_name())
                .collect::<Vec<_>>()
                .join(" -> ");
            let (from, to) = (deferral.from, deferral.to);
            let referenced = graph.nodes[from].object_ref();

            let mut constraints = Vec::with_capacity(deferral.foreign_keys.len());
            for (e, fk) in deferral.foreign_keys {
                graph.edges[e].active = false;
                graph.indegree[to] -= 1;

                let table = &mut graph.nodes[to];
                let constraint = deferred_constraint(table, &referenced, &fk);
                match strip_clause(&table.source_definition, &fk.clause) {
                    Some(stripped) => table.source_definition = stripped,
                    None => notes[to].push(format!(
                        "inline clause for foreign key {} not found in table definition; left unchanged",
                        fk.name
                    )),
                }
                notes[to].push(format!(
                    "foreign key {} deferred to a separate constraint to break cycle {}",
                    fk.name, cycle_text
                ));
                info!(
                    "Breaking dependency cycle {} by deferring foreign key {}",
                    cycle_text, fk.name
                );

                constraints.push(constraint.object_ref());
                deferred.push(ResolvedObject {
                    notes: vec![format!(
                        "deferred from {} to break a dependency cycle",
                        table.qualified_name()
                    )],
                    descriptor: constraint,
                    deferred: true,
                });
            }
            if graph.indegree[to] == 0 {
                ready.insert(graph.ready_key(to));
            }

            broken_cycles.push(BrokenCycle {
                objects: cycle_refs,
                deferred_constraints: constraints,
            });
        }

        deferred.sort_by(|a, b| {
            (&a.descriptor.name, &a.descriptor.schema).cmp(&(&b.descriptor.name, &b.descriptor.schema))
        });

        let mut nodes: Vec<Option<ObjectDescriptor>> = graph.nodes.into_iter().map(Some).collect();
        let mut objects: Vec<ResolvedObject> = order
            .into_iter()
            .filter_map(|i| {
                nodes[i].take().map(|descriptor| ResolvedObject {
                    descriptor,
                    notes: std::mem::take(&mut notes[i]),
                    deferred: false,
                })
            })
            .collect();
        objects.extend(deferred);

        debug!(
            "Resolved {} objects ({} deferred constraints)",
            objects.len(),
            broken_cycles.len()
        );

        Ok(Resolution {
            objects,
            broken_cycles,
            external_references: graph.external,
        })
    }
}

/// (priority, name, schema, kind, node index)
type ReadyKey = (u8, String, String, ObjectKind, usize);

struct Edge {
    from: usize,
    to: usize,
    foreign_key: Option<ForeignKeyRef>,
    active: bool,
}

/// Foreign keys to defer from one table pair, with the cycle they close.
struct Deferral {
    from: usize,
    to: usize,
    foreign_keys: Vec<(usize, ForeignKeyRef)>,
    cycle: Vec<usize>,
}

struct Graph {
    nodes: Vec<ObjectDescriptor>,
    edges: Vec<Edge>,
    outgoing: Vec<Vec<usize>>,
    indegree: Vec<usize>,
    external: Vec<ExternalReference>,
}

impl Graph {
    fn build(descriptors: Vec<ObjectDescriptor>) -> Self {
        let mut nodes: Vec<ObjectDescriptor> = Vec::with_capacity(descriptors.len());
        let mut index: HashMap<ObjectRef, usize> = HashMap::new();
        for d in descriptors {
            let d = d.normalize();
            let key = d.object_ref();
            if index.contains_key(&key) {
                warn!("Duplicate object {} ignored", key);
                continue;
            }
            index.insert(key, nodes.len());
            nodes.push(d);
        }

        let mut edges = Vec::new();
        let mut outgoing = vec![Vec::new(); nodes.len()];
        let mut indegree = vec![0; nodes.len()];
        let mut external = Vec::new();

        for (to, node) in nodes.iter().enumerate() {
            for r in &node.references {
                match index.get(&r.target) {
                    Some(&from) => {
                        outgoing[from].push(edges.len());
                        indegree[to] += 1;
                        edges.push(Edge {
                            from,
                            to,
                            foreign_key: r.foreign_key.clone(),
                            active: true,
                        });
                    }
                    None => {
                        debug!("{} references {} outside the analyzed set", node.object_ref(), r.target);
                        external.push(ExternalReference {
                            from: node.object_ref(),
                            to: r.target.clone(),
                        });
                    }
                }
            }
        }

        Self {
            nodes,
            edges,
            outgoing,
            indegree,
            external,
        }
    }

    fn ready_key(&self, i: usize) -> ReadyKey {
        let node = &self.nodes[i];
        (
            node.kind.priority(),
            node.name.clone(),
            node.schema.clone(),
            node.kind,
            i,
        )
    }

    /// Shortest path `start -> ... -> goal` over active edges between alive nodes.
    fn path(&self, start: usize, goal: usize, alive: &[bool]) -> Option<Vec<usize>> {
        let mut prev = vec![usize::MAX; self.nodes.len()];
        let mut queue = VecDeque::from([start]);
        prev[start] = start;

        while let Some(u) = queue.pop_front() {
            if u == goal {
                let mut path = vec![goal];
                let mut cur = goal;
                while cur != start {
                    cur = prev[cur];
                    path.push(cur);
                }
                path.reverse();
                return Some(path);
            }
            for &e in &self.outgoing[u] {
                let edge = &self.edges[e];
                if edge.active && alive[edge.to] && prev[edge.to] == usize::MAX {
                    prev[edge.to] = u;
                    queue.push_back(edge.to);
                }
            }
        }
        None
    }

    /// The foreign keys to defer, with the cycle they close.
    ///
    /// Candidates are ordered by constraint name, then owning table, and the
    /// first one that actually lies on a cycle wins. Every other active
    /// foreign key between the same two tables closes the same cycle, so
    /// they are deferred together.
    fn find_deferrable(&self, alive: &[bool]) -> Option<Deferral> {
        let mut candidates: Vec<(usize, &ForeignKeyRef)> = self
            .edges
            .iter()
            .enumerate()
            .filter(|(_, edge)| edge.active && alive[edge.from] && alive[edge.to])
            .filter_map(|(e, edge)| edge.foreign_key.as_ref().map(|fk| (e, fk)))
            .collect();
        candidates.sort_by(|(a, fa), (b, fb)| {
            (&fa.name, self.nodes[self.edges[*a].to].object_ref())
                .cmp(&(&fb.name, self.nodes[self.edges[*b].to].object_ref()))
        });

        let (from, to, cycle) = candidates.iter().find_map(|&(e, _)| {
            let edge = &self.edges[e];
            self.path(edge.to, edge.from, alive).map(|path| {
                // path is dependent ... referenced; the cycle starts at the referenced table
                let mut cycle = vec![edge.from];
                cycle.extend(&path[..path.len() - 1]);
                (edge.from, edge.to, cycle)
            })
        })?;

        let foreign_keys = candidates
            .into_iter()
            .filter(|&(e, _)| self.edges[e].from == from && self.edges[e].to == to)
            .map(|(e, fk)| (e, fk.clone()))
            .collect();
        Some(Deferral {
            from,
            to,
            foreign_keys,
            cycle,
        })
    }

    fn cycle_participants(&self, alive: &[bool]) -> Vec<String> {
        let mut on_cycle: Vec<ObjectRef> = (0..self.nodes.len())
            .filter(|&u| alive[u])
            .filter(|&u| {
                self.outgoing[u].iter().any(|&e| {
                    let edge = &self.edges[e];
                    edge.active && alive[edge.to] && self.path(edge.to, u, alive).is_some()
                })
            })
            .map(|u| self.nodes[u].object_ref())
            .collect();
        on_cycle.sort();
        on_cycle.iter().map(ToString::to_string).collect()
    }
}

/// Build the constraint-only descriptor for a deferred foreign key.
fn deferred_constraint(
    table: &ObjectDescriptor,
    referenced: &ObjectRef,
    fk: &ForeignKeyRef,
) -> ObjectDescriptor {
    let clause = fk.clause.trim();
    let body = if clause.to_uppercase().starts_with("CONSTRAINT") {
        clause.to_string()
    } else {
        format!("CONSTRAINT {} {}", fk.name, clause)
    };
    let definition = format!("ALTER TABLE {} ADD {}", table.qualified_name(), body);

    ObjectDescriptor::new(ObjectKind::Constraint, table.schema.clone(), fk.name.clone(), definition)
        .depends_on(ObjectKind::Table, &table.schema, &table.name)
        .depends_on(referenced.kind, &referenced.schema, &referenced.name)
}

/// Remove `clause` and its list separator from a table definition.
fn strip_clause(definition: &str, clause: &str) -> Option<String> {
    let clause = clause.trim();
    if clause.is_empty() {
        return None;
    }
    let start = definition.find(clause)?;
    let end = start + clause.len();

    let before = definition[..start].trim_end();
    if let Some(head) = before.strip_suffix(',') {
        return Some(format!("{}{}", head, &definition[end..]));
    }

    // first entry of the column list: drop the following comma instead
    let after = definition[end..].trim_start();
    let rest = after.strip_prefix(',').map(str::trim_start).unwrap_or(after);
    Some(format!("{}{}", &definition[..start], rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> ObjectDescriptor {
        ObjectDescriptor::new(
            ObjectKind::Table,
            "app",
            name,
            format!("CREATE TABLE app.{} (id INT PRIMARY KEY)", name),
        )
    }

    fn position(res: &Resolution, kind: ObjectKind, name: &str) -> usize {
        res.objects
            .iter()
            .position(|o| o.descriptor.kind == kind && o.descriptor.name == name)
            .unwrap()
    }

    #[test]
    fn test_departments_before_employees() {
        let employees = ObjectDescriptor::new(
            ObjectKind::Table,
            "hr",
            "employees",
            "CREATE TABLE hr.employees (id INT, dept_id INT, CONSTRAINT fk_emp_dept FOREIGN KEY (dept_id) REFERENCES hr.departments (id))",
        )
        .foreign_key(
            "hr",
            "departments",
            "fk_emp_dept",
            "CONSTRAINT fk_emp_dept FOREIGN KEY (dept_id) REFERENCES hr.departments (id)",
        );
        let departments =
            ObjectDescriptor::new(ObjectKind::Table, "hr", "departments", "CREATE TABLE hr.departments (id INT)");

        // employees sorts first by name, so only the edge can put departments ahead
        let res = DependencyResolver::new()
            .resolve(vec![employees, departments])
            .unwrap();
        assert_eq!(res.objects[0].descriptor.name, "departments");
        assert_eq!(res.objects[1].descriptor.name, "employees");
        assert!(res.broken_cycles.is_empty());
        assert!(res.objects.iter().all(|o| o.notes.is_empty()));
    }

    #[test]
    fn test_kind_priority_breaks_ties() {
        let objects = vec![
            ObjectDescriptor::new(ObjectKind::Trigger, "app", "a_trg", ""),
            ObjectDescriptor::new(ObjectKind::View, "app", "a_view", ""),
            ObjectDescriptor::new(ObjectKind::Index, "app", "a_idx", ""),
            ObjectDescriptor::new(ObjectKind::Function, "app", "a_fn", ""),
            table("z_table"),
            ObjectDescriptor::new(ObjectKind::Sequence, "app", "m_seq", ""),
        ];
        let res = DependencyResolver::new().resolve(objects).unwrap();
        let names: Vec<&str> = res.descriptors().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["m_seq", "z_table", "a_idx", "a_view", "a_fn", "a_trg"]);
    }

    #[test]
    fn test_dependency_overrides_priority() {
        // a view used by a table default function still has to come first
        let view = ObjectDescriptor::new(ObjectKind::View, "app", "v_base", "")
            .depends_on(ObjectKind::Table, "app", "orders");
        let func = ObjectDescriptor::new(ObjectKind::Function, "app", "f_total", "")
            .depends_on(ObjectKind::View, "app", "v_base");
        let trigger = ObjectDescriptor::new(ObjectKind::Trigger, "app", "trg_orders", "")
            .depends_on(ObjectKind::Table, "app", "orders")
            .depends_on(ObjectKind::Function, "app", "f_total");
        let res = DependencyResolver::new()
            .resolve(vec![trigger, func, view, table("orders")])
            .unwrap();
        assert!(position(&res, ObjectKind::Table, "orders") < position(&res, ObjectKind::View, "v_base"));
        assert!(position(&res, ObjectKind::View, "v_base") < position(&res, ObjectKind::Function, "f_total"));
        assert!(
            position(&res, ObjectKind::Function, "f_total")
                < position(&res, ObjectKind::Trigger, "trg_orders")
        );
    }

    #[test]
    fn test_every_reference_precedes_dependent() {
        let mut objects = vec![table("customers"), table("products")];
        objects.push(
            table("orders")
                .foreign_key("app", "customers", "fk_o_c", "FOREIGN KEY (c) REFERENCES customers (id)"),
        );
        objects.push(
            table("order_lines")
                .foreign_key("app", "orders", "fk_l_o", "FOREIGN KEY (o) REFERENCES orders (id)")
                .foreign_key("app", "products", "fk_l_p", "FOREIGN KEY (p) REFERENCES products (id)"),
        );
        objects.push(
            ObjectDescriptor::new(ObjectKind::Index, "app", "idx_lines_o", "")
                .depends_on(ObjectKind::Table, "app", "order_lines"),
        );
        objects.push(
            ObjectDescriptor::new(ObjectKind::View, "app", "v_sales", "")
                .depends_on(ObjectKind::Table, "app", "order_lines")
                .depends_on(ObjectKind::Table, "app", "products"),
        );
        objects.push(
            ObjectDescriptor::new(ObjectKind::View, "app", "a_report", "")
                .depends_on(ObjectKind::View, "app", "v_sales"),
        );

        let res = DependencyResolver::new().resolve(objects).unwrap();
        assert_eq!(res.objects.len(), 7);
        for (i, o) in res.objects.iter().enumerate() {
            for r in &o.descriptor.references {
                let dep = res
                    .objects
                    .iter()
                    .position(|x| x.descriptor.object_ref() == r.target)
                    .unwrap();
                assert!(dep < i, "{} must precede {}", r.target, o.descriptor.object_ref());
            }
        }
    }

    #[test]
    fn test_order_is_independent_of_input_order() {
        let build = || {
            vec![
                table("b"),
                table("a").foreign_key("app", "c", "fk_a_c", "FOREIGN KEY (c) REFERENCES c (id)"),
                table("c"),
                ObjectDescriptor::new(ObjectKind::View, "app", "v", "").depends_on(ObjectKind::Table, "app", "a"),
            ]
        };
        let forward = DependencyResolver::new().resolve(build()).unwrap();
        let mut reversed_input = build();
        reversed_input.reverse();
        let reversed = DependencyResolver::new().resolve(reversed_input).unwrap();

        let names = |r: &Resolution| r.descriptors().map(|d| d.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&forward), names(&reversed));
        assert_eq!(names(&forward), vec!["b", "c", "a", "v"]);
    }

    #[test]
    fn test_mutual_foreign_keys_are_deferred() {
        let a = ObjectDescriptor::new(
            ObjectKind::Table,
            "app",
            "a",
            "CREATE TABLE app.a (\n  id INT PRIMARY KEY,\n  b_id INT,\n  CONSTRAINT fk_a_b FOREIGN KEY (b_id) REFERENCES app.b (id)\n)",
        )
        .foreign_key(
            "app",
            "b",
            "fk_a_b",
            "CONSTRAINT fk_a_b FOREIGN KEY (b_id) REFERENCES app.b (id)",
        );
        let b = ObjectDescriptor::new(
            ObjectKind::Table,
            "app",
            "b",
            "CREATE TABLE app.b (\n  id INT PRIMARY KEY,\n  a_id INT,\n  CONSTRAINT fk_b_a FOREIGN KEY (a_id) REFERENCES app.a (id)\n)",
        )
        .foreign_key(
            "app",
            "a",
            "fk_b_a",
            "CONSTRAINT fk_b_a FOREIGN KEY (a_id) REFERENCES app.a (id)",
        );

        let res = DependencyResolver::new().resolve(vec![a, b]).unwrap();
        assert_eq!(res.objects.len(), 3);

        let first = &res.objects[0];
        assert_eq!(first.descriptor.name, "a");
        assert!(!first.descriptor.source_definition.contains("fk_a_b"));
        assert_eq!(
            first.descriptor.source_definition,
            "CREATE TABLE app.a (\n  id INT PRIMARY KEY,\n  b_id INT\n)"
        );
        assert!(first.notes[0].contains("fk_a_b deferred"));

        assert_eq!(res.objects[1].descriptor.name, "b");
        assert!(res.objects[1].descriptor.source_definition.contains("fk_b_a"));

        let constraint = &res.objects[2];
        assert!(constraint.deferred);
        assert_eq!(constraint.descriptor.kind, ObjectKind::Constraint);
        assert_eq!(
            constraint.descriptor.source_definition,
            "ALTER TABLE app.a ADD CONSTRAINT fk_a_b FOREIGN KEY (b_id) REFERENCES app.b (id)"
        );

        assert_eq!(res.broken_cycles.len(), 1);
        let names: Vec<&str> = res.broken_cycles[0]
            .objects
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_every_foreign_key_between_cycle_tables_is_deferred() {
        let a = ObjectDescriptor::new(
            ObjectKind::Table,
            "app",
            "a",
            "CREATE TABLE app.a (id INT PRIMARY KEY, b1 INT, b2 INT, \
             CONSTRAINT fk_a_b1 FOREIGN KEY (b1) REFERENCES app.b (id), \
             CONSTRAINT fk_a_b2 FOREIGN KEY (b2) REFERENCES app.b (id))",
        )
        .foreign_key("app", "b", "fk_a_b1", "CONSTRAINT fk_a_b1 FOREIGN KEY (b1) REFERENCES app.b (id)")
        .foreign_key("app", "b", "fk_a_b2", "CONSTRAINT fk_a_b2 FOREIGN KEY (b2) REFERENCES app.b (id)");
        let b = ObjectDescriptor::new(
            ObjectKind::Table,
            "app",
            "b",
            "CREATE TABLE app.b (id INT PRIMARY KEY, a_id INT, \
             CONSTRAINT fk_b_a FOREIGN KEY (a_id) REFERENCES app.a (id))",
        )
        .foreign_key("app", "a", "fk_b_a", "CONSTRAINT fk_b_a FOREIGN KEY (a_id) REFERENCES app.a (id)");

        let res = DependencyResolver::new().resolve(vec![a, b]).unwrap();
        assert_eq!(res.objects.len(), 4);

        let first = &res.objects[0].descriptor;
        assert_eq!(first.name, "a");
        assert!(!first.source_definition.contains("REFERENCES"));
        assert_eq!(first.source_definition, "CREATE TABLE app.a (id INT PRIMARY KEY, b1 INT, b2 INT)");
        assert_eq!(res.objects[1].descriptor.name, "b");

        let deferred: Vec<&str> = res
            .objects
            .iter()
            .filter(|o| o.deferred)
            .map(|o| o.descriptor.name.as_str())
            .collect();
        assert_eq!(deferred, vec!["fk_a_b1", "fk_a_b2"]);
        assert_eq!(res.broken_cycles.len(), 1);
        assert_eq!(res.broken_cycles[0].deferred_constraints.len(), 2);
    }

    #[test]
    fn test_plain_reference_then_foreign_key_is_still_deferrable() {
        let a = table("a")
            .depends_on(ObjectKind::Table, "app", "b")
            .foreign_key("app", "b", "fk_a_b", "FOREIGN KEY (b) REFERENCES b (id)");
        let b = table("b")
            .depends_on(ObjectKind::Table, "app", "a")
            .foreign_key("app", "a", "fk_b_a", "FOREIGN KEY (a) REFERENCES a (id)");

        let res = DependencyResolver::new().resolve(vec![a, b]).unwrap();
        assert_eq!(res.objects.len(), 3);
        assert!(res.objects[2].deferred);
        assert_eq!(res.objects[2].descriptor.name, "fk_a_b");
    }

    #[test]
    fn test_deferred_constraints_follow_everything() {
        let a = table("a").foreign_key("app", "b", "fk_a_b", "FOREIGN KEY (b) REFERENCES b (id)");
        let b = table("b").foreign_key("app", "a", "fk_b_a", "FOREIGN KEY (a) REFERENCES a (id)");
        let trg = ObjectDescriptor::new(ObjectKind::Trigger, "app", "trg_b", "")
            .depends_on(ObjectKind::Table, "app", "b");
        let res = DependencyResolver::new().resolve(vec![trg, a, b]).unwrap();
        let last = res.objects.last().unwrap();
        assert!(last.deferred);
        assert_eq!(
            last.descriptor.source_definition,
            "ALTER TABLE app.a ADD CONSTRAINT fk_a_b FOREIGN KEY (b) REFERENCES b (id)"
        );
        assert!(position(&res, ObjectKind::Trigger, "trg_b") < res.objects.len() - 1);
    }

    #[test]
    fn test_view_cycle_is_error() {
        let v1 = ObjectDescriptor::new(ObjectKind::View, "app", "v1", "")
            .depends_on(ObjectKind::View, "app", "v2");
        let v2 = ObjectDescriptor::new(ObjectKind::View, "app", "v2", "")
            .depends_on(ObjectKind::View, "app", "v1");
        let downstream = ObjectDescriptor::new(ObjectKind::View, "app", "v3", "")
            .depends_on(ObjectKind::View, "app", "v2");

        let err = DependencyResolver::new()
            .resolve(vec![v1, v2, downstream, table("t")])
            .unwrap_err();
        match err {
            MigrateError::Cycle { objects } => {
                assert_eq!(objects, vec!["view:app.v1", "view:app.v2"]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_reference_is_recorded() {
        let v = ObjectDescriptor::new(ObjectKind::View, "app", "v", "")
            .depends_on(ObjectKind::Table, "other", "ext");
        let res = DependencyResolver::new().resolve(vec![v]).unwrap();
        assert_eq!(res.objects.len(), 1);
        assert_eq!(res.external_references.len(), 1);
        assert_eq!(res.external_references[0].to.name, "ext");
    }

    #[test]
    fn test_strip_clause_first_entry() {
        let def = "CREATE TABLE t (CONSTRAINT fk FOREIGN KEY (x) REFERENCES u (id), x INT)";
        let out = strip_clause(def, "CONSTRAINT fk FOREIGN KEY (x) REFERENCES u (id)").unwrap();
        assert_eq!(out, "CREATE TABLE t (x INT)");
        assert!(strip_clause(def, "missing").is_none());
    }
}
