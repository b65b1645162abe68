// tests/unit/scope_resolver_test.rs

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use spirit_reporting_engine::domain::error::ScopeError;
use spirit_reporting_engine::domain::model::access_level::{AccessLevel, BindingKind};
use spirit_reporting_engine::domain::model::ids::{
    BranchId, CompanyId, CustomerId, EmployeeId, PartnerId, RegionId, TeamId,
};
use spirit_reporting_engine::domain::model::principal::{Principal, ScopeBindings};
use spirit_reporting_engine::domain::model::scope_filter::{ColumnMask, OrgFacts, RowScope};
use spirit_reporting_engine::repository::org_directory::InMemoryOrgDirectory;
use spirit_reporting_engine::service::scope_resolver::ScopeResolver;

fn facts(employee: u64, branch: u64, region: u64) -> OrgFacts {
    OrgFacts {
        employee_id: EmployeeId(employee),
        branch_id: BranchId(branch),
        region_id: RegionId(region),
        company_id: CompanyId(1),
        partner_id: None,
        customer_id: None,
    }
}

fn directory() -> Arc<InMemoryOrgDirectory> {
    let dir = InMemoryOrgDirectory::new();
    let principals = [
        Principal::new("admin", AccessLevel::Admin, ScopeBindings::default()),
        Principal::new("dg", AccessLevel::DirectorGeneral, ScopeBindings::default()),
        Principal::new("gr-2", AccessLevel::GerenteRegional, ScopeBindings::region(2)),
        Principal::new("ds-7", AccessLevel::DirectorSucursal, ScopeBindings::branch(7)),
        Principal::new("ds-8", AccessLevel::DirectorSucursal, ScopeBindings::branch(8)),
        Principal::new("contador", AccessLevel::Contador, ScopeBindings::default()),
        Principal::new("auditor", AccessLevel::Auditor, ScopeBindings::default()),
        Principal::new("sup-3", AccessLevel::Supervisor, ScopeBindings::team(3)),
        Principal::new("v-42", AccessLevel::Vendedor, ScopeBindings::employee(42)),
        Principal::new("partner-9", AccessLevel::Partner, ScopeBindings::partner(9)),
        Principal::new("vip-5", AccessLevel::ClienteVip, ScopeBindings::customer(5)),
    ];
    for p in principals {
        dir.upsert_principal(p.unwrap()).unwrap();
    }
    dir.set_team_members(TeamId(3), [EmployeeId(42), EmployeeId(43)]).unwrap();
    Arc::new(dir)
}

#[test]
fn every_level_maps_to_its_row_scope() {
    let r = ScopeResolver::new(directory());
    let rows = |id: &str| r.resolve_id(id).unwrap().rows;

    assert_eq!(rows("admin"), RowScope::All);
    assert_eq!(rows("dg"), RowScope::All);
    assert_eq!(rows("gr-2"), RowScope::Region { region_id: RegionId(2) });
    assert_eq!(rows("ds-7"), RowScope::Branch { branch_id: BranchId(7) });
    assert_eq!(rows("contador"), RowScope::All);
    assert_eq!(rows("auditor"), RowScope::All);
    assert_eq!(rows("v-42"), RowScope::Employee { employee_id: EmployeeId(42) });
    assert_eq!(rows("partner-9"), RowScope::Partner { partner_id: PartnerId(9) });
    assert_eq!(rows("vip-5"), RowScope::Customer { customer_id: CustomerId(5) });
    assert!(matches!(rows("sup-3"), RowScope::Team { team_id: TeamId(3), .. }));

    let contador = r.resolve_id("contador").unwrap();
    assert_eq!(contador.columns, ColumnMask::FinancialOnly);
    let auditor = r.resolve_id("auditor").unwrap();
    assert!(auditor.read_only);
    assert!(matches!(auditor.ensure_writable(), Err(ScopeError::ReadOnly { .. })));
}

#[test]
fn shipped_directory_seed_resolves() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/directory.yaml");
    let dir = Arc::new(InMemoryOrgDirectory::load_yaml(&path).unwrap());
    let r = ScopeResolver::new(dir);

    assert_eq!(r.resolve_id("dir-suc-7").unwrap().rows, RowScope::Branch { branch_id: BranchId(7) });
    let team = r.resolve_id("sup-3").unwrap();
    assert!(team.matches_facts(&facts(43, 7, 2)));
    assert!(!team.matches_facts(&facts(44, 7, 2)));
    assert!(matches!(r.resolve_id("nadie"), Err(ScopeError::UnknownPrincipal(_))));

    let err = Principal::new("v-bad", AccessLevel::Vendedor, ScopeBindings::branch(7)).unwrap_err();
    assert!(matches!(err, ScopeError::InconsistentBinding { kind: BindingKind::Branch, .. }));
}

#[test]
fn gerente_without_region_fails_instead_of_widening() {
    let dir = directory();
    dir.upsert_principal(Principal::new("gr-x", AccessLevel::GerenteRegional, ScopeBindings::default()).unwrap())
        .unwrap();
    let r = ScopeResolver::new(dir);
    assert!(matches!(
        r.resolve_id("gr-x"),
        Err(ScopeError::MissingBinding { required: BindingKind::Region, .. })
    ));
}

#[test]
fn supervisor_scope_follows_current_team() {
    let dir = directory();
    let r = ScopeResolver::new(dir.clone());
    let before = r.resolve_id("sup-3").unwrap();
    assert!(before.matches_facts(&facts(43, 7, 2)));

    // 43 deja el equipo; el siguiente cálculo ya no lo incluye.
    dir.set_team_members(TeamId(3), [EmployeeId(42)]).unwrap();
    let after = r.resolve_id("sup-3").unwrap();
    assert!(after.matches_facts(&facts(42, 7, 2)));
    assert!(!after.matches_facts(&facts(43, 7, 2)));
    assert_ne!(before.cache_key(), after.cache_key());
}

#[test]
fn eligible_recipients_cover_every_origin_record() {
    let r = ScopeResolver::new(directory());
    let origin: BTreeSet<OrgFacts> = [facts(42, 7, 2)].into_iter().collect();

    let ids = |audience: &[AccessLevel], origin: &BTreeSet<OrgFacts>| -> Vec<String> {
        let mut v: Vec<String> = r
            .eligible_recipients(audience, origin)
            .unwrap()
            .into_iter()
            .map(|e| e.principal.id)
            .collect();
        v.sort();
        v
    };

    assert_eq!(
        ids(&[], &origin),
        vec!["admin", "auditor", "contador", "dg", "ds-7", "gr-2", "sup-3", "v-42"]
    );
    assert_eq!(ids(&[AccessLevel::DirectorSucursal], &origin), vec!["ds-7"]);

    // Datos de dos sucursales: ningún director de sucursal los cubre por completo.
    let mixed: BTreeSet<OrgFacts> = [facts(42, 7, 2), facts(50, 8, 2)].into_iter().collect();
    assert!(ids(&[AccessLevel::DirectorSucursal], &mixed).is_empty());
    assert_eq!(ids(&[AccessLevel::GerenteRegional], &mixed), vec!["gr-2"]);

    // Sin origen sólo califican alcances sin filtro de filas.
    let none = BTreeSet::new();
    assert_eq!(ids(&[], &none), vec!["admin", "auditor", "contador", "dg"]);
}

/// Rejilla de hechos organizacionales que cruza todas las vinculaciones del directorio.
fn fact_grid() -> Vec<OrgFacts> {
    let mut grid = Vec::new();
    for employee in [41, 42, 43, 44] {
        for (branch, region) in [(7, 2), (8, 2), (9, 3)] {
            for partner in [None, Some(9), Some(10)] {
                for customer in [None, Some(5), Some(6)] {
                    let mut f = facts(employee, branch, region);
                    f.partner_id = partner.map(PartnerId);
                    f.customer_id = customer.map(CustomerId);
                    grid.push(f);
                }
            }
        }
    }
    grid
}

#[test]
fn no_level_sees_rows_outside_its_bindings() {
    let r = ScopeResolver::new(directory());
    let ids = [
        "admin", "dg", "gr-2", "ds-7", "ds-8", "contador", "auditor", "sup-3", "v-42", "partner-9", "vip-5",
    ];
    let allowed = |id: &str, f: &OrgFacts| -> bool {
        match id {
            "admin" | "dg" | "contador" | "auditor" => true,
            "gr-2" => f.region_id == RegionId(2),
            "ds-7" => f.branch_id == BranchId(7),
            "ds-8" => f.branch_id == BranchId(8),
            "sup-3" => f.employee_id == EmployeeId(42) || f.employee_id == EmployeeId(43),
            "v-42" => f.employee_id == EmployeeId(42),
            "partner-9" => f.partner_id == Some(PartnerId(9)),
            "vip-5" => f.customer_id == Some(CustomerId(5)),
            other => panic!("unexpected principal {other}"),
        }
    };

    let grid = fact_grid();
    let admin = r.resolve_id("admin").unwrap();
    let mut levels = BTreeSet::new();
    for id in ids {
        let scope = r.resolve_id(id).unwrap();
        levels.insert(scope.level);
        let mut visible = 0;
        for f in &grid {
            assert_eq!(scope.matches_facts(f), allowed(id, f), "{id} on {f:?}");
            if scope.matches_facts(f) {
                visible += 1;
                assert!(admin.matches_facts(f), "{id} sees a row the admin does not");
            }
        }
        if !scope.rows.is_unrestricted() {
            assert!(visible < grid.len(), "{id} should not see the whole grid");
        }
    }
    assert_eq!(levels.len(), AccessLevel::ALL.len());
}

