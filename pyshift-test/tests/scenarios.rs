//! End-to-end migration scenarios over real project fixtures.

use pyshift_core::types::{
    AnalyseOptions, ApplyOptions, BreakingChange, ChangeKind, Confidence, MatchSpec, PatchState,
    RiskLevel, Tier, TierPolicy,
};
use pyshift_test::TestProject;

// ── S1: method rename ───────────────────────────────────────────────

#[tokio::test]
async fn s1_method_rename() {
    let project = TestProject::new();
    project.write(
        "models.py",
        "from pydantic import BaseModel\n\nclass Model(BaseModel):\n    name: str\n\nu = Model()\nd = u.dict()\nj = u.json()\n",
    );

    let engine = project.engine();
    let session = project.analyse(&engine, "pydantic", "1.10", "2.5").await;

    assert_eq!(session.patches.len(), 1);
    let patch = &session.patches[0];
    assert_eq!(patch.state, PatchState::Ready);
    assert_eq!(patch.changes.len(), 2);
    assert!(patch.patched_source.contains("d = u.model_dump()"));
    assert!(patch.patched_source.contains("j = u.model_dump_json()"));
    // Imports unchanged: BaseModel is still the only pydantic import.
    assert!(patch
        .patched_source
        .contains("from pydantic import BaseModel\n"));
    assert_eq!(session.risk.level, RiskLevel::Low);
}

// ── S2: decorator and argument rewrite, idempotent ──────────────────

#[tokio::test]
async fn s2_decorator_rewrite_and_second_run_is_empty() {
    let project = TestProject::new();
    project.write(
        "models.py",
        "from pydantic import BaseModel, validator\n\nclass User(BaseModel):\n    age: int\n\n    @validator(\"age\", pre=True)\n    def v(cls, x):\n        return x\n",
    );

    let engine = project.engine();
    let session = project.analyse(&engine, "pydantic", "1.10", "2.5").await;
    assert_eq!(session.patches.len(), 1);
    let patched = &session.patches[0].patched_source;
    assert!(patched.contains("@field_validator(\"age\", mode=\"before\")"));
    assert!(patched.contains("    @classmethod\n    def v(cls, x):"));
    assert!(patched.contains("field_validator"), "import added");

    engine.apply(&ApplyOptions::default()).unwrap();

    // Second identical run yields an empty session.
    let second = project.analyse(&engine, "pydantic", "1.10", "2.5").await;
    assert!(second.patches.is_empty());
}

// ── S3: class-body restructure ──────────────────────────────────────

#[tokio::test]
async fn s3_config_class_restructure() {
    let project = TestProject::new();
    project.write(
        "models.py",
        "from pydantic import BaseModel\n\nclass U(BaseModel):\n    class Config:\n        orm_mode = True\n        allow_mutation = False\n",
    );

    let engine = project.engine();
    let session = project.analyse(&engine, "pydantic", "1.10", "2.5").await;

    let patched = &session.patches[0].patched_source;
    assert!(!patched.contains("class Config"));
    assert!(patched.contains("model_config = ConfigDict(from_attributes=True, frozen=True)"));
    assert!(patched.contains("ConfigDict"), "helper import present");
}

// ── S4: query-chain rewrite with helper imports ─────────────────────

#[tokio::test]
async fn s4_query_chain_rewrite() {
    let project = TestProject::new();
    project.write(
        "repo.py",
        "from sqlalchemy.orm import Session\n\ndef first_user(session, U):\n    return session.query(U).filter(U.id == 1).first()\n\ndef count_users(session, U):\n    return session.query(U).count()\n",
    );

    let engine = project.engine();
    let session = project.analyse(&engine, "sqlalchemy", "1.4", "2.0").await;

    let patched = &session.patches[0].patched_source;
    assert!(patched.contains("session.execute(select(U).where(U.id == 1)).scalars().first()"));
    assert!(patched.contains("session.execute(select(func.count()).select_from(U)).scalar()"));
    assert!(patched.contains("from sqlalchemy import select, func"));
}

// ── S5: argument removal without trailing comma ─────────────────────

#[tokio::test]
async fn s5_argument_removal_is_clean() {
    let project = TestProject::new();
    project.write(
        "db.py",
        "from sqlalchemy import create_engine\n\nengine = create_engine(\"sqlite:///x\", future=True)\n",
    );

    let engine = project.engine();
    let session = project.analyse(&engine, "sqlalchemy", "1.4", "2.0").await;

    let patched = &session.patches[0].patched_source;
    assert!(patched.contains("engine = create_engine(\"sqlite:///x\")\n"));
    assert!(!patched.contains(", )"));
    assert!(!patched.contains(",)"));
}

// ── S6: call wrapping with helper import ────────────────────────────

#[tokio::test]
async fn s6_execute_string_wrapped_in_text() {
    let project = TestProject::new();
    project.write(
        "db.py",
        "import sqlalchemy\n\ndef ping(conn):\n    return conn.execute(\"SELECT 1\")\n",
    );

    let engine = project.engine();
    let session = project.analyse(&engine, "sqlalchemy", "1.4", "2.0").await;

    let patched = &session.patches[0].patched_source;
    assert!(patched.contains("conn.execute(text(\"SELECT 1\"))"));
    assert!(patched.contains("from sqlalchemy import text"));
}

// ── S7: import-path rewrite with documented exclusion ───────────────

#[tokio::test]
async fn s7_starlette_import_move_with_exclusion() {
    let project = TestProject::new();
    project.write(
        "api.py",
        "from starlette.responses import JSONResponse\nfrom starlette.status import HTTP_200_OK\n\ndef ok():\n    return JSONResponse({}, status_code=HTTP_200_OK)\n",
    );

    let engine = project.engine();
    let session = project.analyse(&engine, "fastapi", "0.95", "0.110").await;

    let patched = &session.patches[0].patched_source;
    assert!(patched.contains("from fastapi.responses import JSONResponse"));
    assert!(
        patched.contains("from starlette.status import HTTP_200_OK"),
        "starlette.status is excluded from the move"
    );
}

// ── S8: tier fallback ───────────────────────────────────────────────

fn run_rename_change() -> BreakingChange {
    BreakingChange {
        id: "somelib-run-rename".to_string(),
        kind: ChangeKind::MethodRename,
        matcher: MatchSpec {
            symbol: "run".to_string(),
            receiver: None,
            argument: None,
        },
        replacement: "start".to_string(),
        confidence: Confidence::Medium,
        requires_imports: vec![],
        removes_imports: vec![],
        explanation: "run() was renamed to start()".to_string(),
        provenance: None,
    }
}

#[tokio::test]
async fn s8_tier_fallback_applies_spec_change() {
    let project = TestProject::new();
    project.write(
        "svc.py",
        "from somelib import Client\n\nclient = Client()\nclient.run()\n",
    );

    let engine = project.engine_with_spec(vec![run_rename_change()]);
    let session = project.analyse(&engine, "somelib", "1.0", "2.0").await;

    assert_eq!(session.patches.len(), 1);
    let patch = &session.patches[0];
    assert_eq!(patch.tier, Tier::Tier2);
    assert_eq!(patch.changes.len(), 1);
    assert_eq!(patch.changes[0].confidence, Confidence::Medium);
    assert!(patch.patched_source.contains("client.start()"));
    assert!(session.risk.score > 0);
}

#[tokio::test]
async fn s8_tier1_only_downgrades_with_diagnostic() {
    let project = TestProject::new();
    project.write(
        "svc.py",
        "from somelib import Client\n\nclient = Client()\nclient.run()\n",
    );

    let engine = project.engine_with_spec(vec![run_rename_change()]);
    let options = AnalyseOptions {
        tier_policy: TierPolicy::Tier1Only,
        ..Default::default()
    };
    let session = project
        .analyse_with(&engine, "somelib", "1.0", "2.0", &options)
        .await;

    assert!(session.patches.is_empty(), "zero edits under tier1-only");
    assert!(session
        .diagnostics
        .iter()
        .any(|d| d.message.contains("tier downgrade")));
}
