use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn kmap(db: &Path) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("kmap")?;
    cmd.arg("--db").arg(db).env("KMAP_LOG", "off");
    Ok(cmd)
}

fn created_id(stdout: &[u8]) -> String {
    let text = String::from_utf8_lossy(stdout);
    text.trim()
        .rsplit_once('(')
        .and_then(|(_, rest)| rest.strip_suffix(')'))
        .expect("created id in output")
        .to_string()
}

#[test]
fn empty_database_lists_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    kmap(&tmp.path().join("maps.db"))?
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No documents yet."));
    Ok(())
}

#[test]
fn new_document_shows_up_in_list_and_outline() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let db = tmp.path().join("maps.db");

    let output = kmap(&db)?.args(["new", "Thesis"]).output()?;
    assert!(output.status.success());
    let id = created_id(&output.stdout);

    kmap(&db)?
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()).and(predicate::str::contains("Thesis")));

    kmap(&db)?
        .args(["show", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Thesis\n"))
        .stdout(predicate::str::contains("* Central Topic [folder]"));
    Ok(())
}

#[test]
fn delete_with_yes_removes_the_document() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let db = tmp.path().join("maps.db");

    let output = kmap(&db)?.args(["new", "Scratch"]).output()?;
    let id = created_id(&output.stdout);

    kmap(&db)?
        .args(["delete", id.as_str(), "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Deleted {id}")));

    kmap(&db)?
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No documents yet."));

    kmap(&db)?
        .args(["show", id.as_str()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open document"));
    Ok(())
}

#[test]
fn blank_names_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    kmap(&tmp.path().join("maps.db"))?
        .args(["new", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("document name cannot be empty"));
    Ok(())
}
