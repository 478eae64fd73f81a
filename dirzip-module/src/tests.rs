// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::metadata::Metadata;
use crate::{DirZipConf, DirZipHandler};

use dirzip_module_utils::session::{create_test_session, RequestHeader, Session};
use dirzip_module_utils::{ErrorType, FromYaml, CONFIG_ERROR, STREAMING_FAILURE};
use startup_module::{AppResult, DefaultApp};
use std::fs::{create_dir, create_dir_all, write, File};
use std::io::{Cursor, Read, Write};
use tempfile::TempDir;
use test_log::test;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::{CompressionMethod, ZipArchive};

fn make_fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    let testdir = root.join("testdir");
    create_dir_all(testdir.join("directory")).unwrap();
    write(testdir.join("patates"), "des patates\n").unwrap();
    write(testdir.join("zipfile.zip"), "not really a zip file").unwrap();
    write(testdir.join("directory/carottes"), "des carottes\n").unwrap();
    write(testdir.join("directory/patates"), "encore des patates\n").unwrap();
    write(testdir.join(".hidden"), "secret").unwrap();
    create_dir(testdir.join(".hiddendir")).unwrap();
    write(testdir.join(".hiddendir/file"), "secret").unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink("patates", testdir.join("symlink")).unwrap();

    let dir_with_zip = root.join("dir_with_zip");
    create_dir_all(dir_with_zip.join("dir")).unwrap();
    write(dir_with_zip.join("dir/file"), "file").unwrap();
    let mut zip = ZipWriter::new(File::create(dir_with_zip.join("dir.zip")).unwrap());
    for name in ["1", "2", "3", "4"] {
        zip.start_file(
            name,
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        )
        .unwrap();
        zip.write_all(name.as_bytes()).unwrap();
    }
    zip.finish().unwrap();

    let dir_with_index = root.join("dir_with_index");
    create_dir(&dir_with_index).unwrap();
    write(dir_with_index.join("index.html"), "<h1>index</h1>").unwrap();
    write(dir_with_index.join("other"), "other").unwrap();

    write(root.join("empty.txt"), "").unwrap();

    dir
}

fn root_str(dir: &TempDir) -> String {
    dir.path().to_str().unwrap().to_owned()
}

fn make_conf(conf_str: impl AsRef<str>) -> DirZipConf {
    DirZipConf::from_yaml(conf_str).unwrap()
}

fn make_app(dir: &TempDir, options: &str) -> DefaultApp<DirZipHandler> {
    let conf = make_conf(format!("mounts:\n  /test: \"{}{options}\"", root_str(dir)));
    DefaultApp::new(conf.try_into().unwrap())
}

fn make_session(method: &str, path: &str) -> Session {
    let header = RequestHeader::build(method, path.as_bytes(), None).unwrap();
    create_test_session(header)
}

async fn get(app: &DefaultApp<DirZipHandler>, path: &str) -> AppResult {
    app.handle_request(make_session("GET", path)).await
}

fn status(result: &AppResult) -> u16 {
    result.session().response_written().unwrap().status.as_u16()
}

fn header<'a>(result: &'a AppResult, name: &str) -> Option<&'a str> {
    result
        .session()
        .response_written()
        .unwrap()
        .headers
        .get(name)
        .map(|value| value.to_str().unwrap())
}

fn assert_headers(result: &AppResult, expected: Vec<(&str, &str)>) {
    let mut headers: Vec<_> = result
        .session()
        .response_written()
        .unwrap()
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_ascii_lowercase(),
                value.to_str().unwrap().to_owned(),
            )
        })
        .collect();
    headers.sort();

    let mut expected: Vec<_> = expected
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.to_owned()))
        .collect();
    expected.sort();

    assert_eq!(headers, expected);
}

fn assert_not_found(result: &AppResult) {
    assert_eq!(
        result.err().as_ref().map(|err| &err.etype),
        Some(&ErrorType::HTTPStatus(404))
    );
    assert_eq!(status(result), 404);
    assert_eq!(result.body_str(), "Not Found");
}

fn zip_contents(data: &[u8]) -> Vec<(String, String)> {
    let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut content = String::new();
            file.read_to_string(&mut content).unwrap();
            (file.name().to_owned(), content)
        })
        .collect()
}

fn file_meta(dir: &TempDir, path: &str) -> Metadata {
    Metadata::from_path(&dir.path().join(path)).unwrap()
}

#[test(tokio::test)]
async fn unmapped_paths() {
    let dir = make_fixture();
    let app = make_app(&dir, "");

    for path in ["/", "/testdir/patates", "/testing", "/test.zip", "/te"] {
        assert_not_found(&get(&app, path).await);
    }
}

#[test(tokio::test)]
async fn file() {
    let dir = make_fixture();
    let app = make_app(&dir, "");
    let meta = file_meta(&dir, "testdir/patates");

    let result = get(&app, "/test/testdir/patates").await;
    assert!(result.err().is_none());
    assert_eq!(status(&result), 200);
    assert_headers(
        &result,
        vec![
            ("Content-Length", "12"),
            ("Accept-Ranges", "bytes"),
            ("Content-Type", "application/octet-stream"),
            ("Last-Modified", meta.modified.as_deref().unwrap()),
            ("ETag", &meta.etag),
        ],
    );
    assert_eq!(result.body_str(), "des patates\n");

    // Path is normalized
    let result = get(&app, "/test//testdir/./directory/../patates").await;
    assert_eq!(status(&result), 200);
    assert_eq!(result.body_str(), "des patates\n");

    let result = get(&app, "/test/testdir/direc%74ory/carottes").await;
    assert_eq!(status(&result), 200);
    assert_eq!(result.body_str(), "des carottes\n");
}

#[test(tokio::test)]
async fn empty_file() {
    let dir = make_fixture();
    let app = make_app(&dir, "");

    let result = get(&app, "/test/empty.txt").await;
    assert!(result.err().is_none());
    assert_eq!(status(&result), 200);
    assert_eq!(header(&result, "Content-Length"), Some("0"));
    assert_eq!(
        header(&result, "Content-Type"),
        Some("text/plain; charset=utf-8")
    );
    assert_eq!(result.body_str(), "");
}

#[test(tokio::test)]
async fn hidden_entries() {
    let dir = make_fixture();
    let app = make_app(&dir, "");

    for path in [
        "/test/testdir/.hidden",
        "/test/testdir/.hiddendir",
        "/test/testdir/.hiddendir/",
        "/test/testdir/.hiddendir/file",
        "/test/testdir/.hiddendir.zip",
        "/test/testdir/%2Ehidden",
    ] {
        assert_not_found(&get(&app, path).await);
    }
}

#[cfg(unix)]
#[test(tokio::test)]
async fn symbolic_links() {
    let dir = make_fixture();
    let app = make_app(&dir, "");

    assert_not_found(&get(&app, "/test/testdir/symlink").await);

    std::os::unix::fs::symlink(dir.path().join("testdir"), dir.path().join("linkdir")).unwrap();
    assert_not_found(&get(&app, "/test/linkdir/").await);
    assert_not_found(&get(&app, "/test/linkdir/patates").await);
    assert_not_found(&get(&app, "/test/linkdir.zip").await);
}

#[test(tokio::test)]
async fn path_traversal() {
    let dir = make_fixture();
    let app = make_app(&dir, "");

    for path in [
        "/test/../../etc/passwd",
        "/test/testdir/../../../etc/passwd",
        "/test/%2e%2e/%2e%2e/etc/passwd",
        "/test/..%2F..%2Fetc%2Fpasswd",
    ] {
        assert_not_found(&get(&app, path).await);
    }

    // Leaving the mount and coming back is fine
    let result = get(&app, "/test/../test/testdir/patates").await;
    assert_eq!(status(&result), 200);
}

#[test(tokio::test)]
async fn virtual_archive() {
    let dir = make_fixture();
    let app = make_app(&dir, "");

    let result = get(&app, "/test/testdir.zip").await;
    assert!(result.err().is_none());
    assert_eq!(status(&result), 200);
    assert_headers(
        &result,
        vec![
            ("Content-Type", "application/zip"),
            ("Content-Disposition", "attachment; filename=\"testdir.zip\""),
        ],
    );
    assert_eq!(
        zip_contents(result.body()),
        vec![
            (
                "directory/carottes".to_owned(),
                "des carottes\n".to_owned()
            ),
            (
                "directory/patates".to_owned(),
                "encore des patates\n".to_owned()
            ),
            ("patates".to_owned(), "des patates\n".to_owned()),
            (
                "zipfile.zip".to_owned(),
                "not really a zip file".to_owned()
            ),
        ]
    );

    let result = get(&app, "/test/testdir/directory.zip").await;
    assert_eq!(status(&result), 200);
    assert_eq!(
        header(&result, "Content-Disposition"),
        Some("attachment; filename=\"directory.zip\"")
    );
    assert_eq!(
        zip_contents(result.body())
            .into_iter()
            .map(|(name, _)| name)
            .collect::<Vec<_>>(),
        vec!["carottes".to_owned(), "patates".to_owned()]
    );

    // Only directories can be archived
    assert_not_found(&get(&app, "/test/testdir/patates.zip").await);
    assert_not_found(&get(&app, "/test/testdir/missing.zip").await);
    assert_not_found(&get(&app, "/test/testdir/.zip").await);
}

#[test(tokio::test)]
async fn archive_idempotence() {
    let dir = make_fixture();
    let app = make_app(&dir, "");

    let first = get(&app, "/test/testdir.zip").await;
    let second = get(&app, "/test/testdir.zip").await;
    assert_eq!(zip_contents(first.body()), zip_contents(second.body()));
}

#[test(tokio::test)]
async fn empty_archive() {
    let dir = make_fixture();
    create_dir(dir.path().join("empty")).unwrap();
    let app = make_app(&dir, "");

    let result = get(&app, "/test/empty.zip").await;
    assert_eq!(status(&result), 200);
    assert!(zip_contents(result.body()).is_empty());
}

#[cfg(unix)]
#[test(tokio::test)]
async fn archive_failure() {
    use std::fs::{read_dir, set_permissions, Permissions};
    use std::os::unix::fs::PermissionsExt;

    let dir = make_fixture();
    let locked = dir.path().join("testdir/locked");
    create_dir(&locked).unwrap();
    write(locked.join("file"), "unreachable").unwrap();
    set_permissions(&locked, Permissions::from_mode(0o000)).unwrap();
    if read_dir(&locked).is_ok() {
        // Permissions aren't enforced, e.g. when running as root
        set_permissions(&locked, Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let app = make_app(&dir, "");
    let result = get(&app, "/test/testdir.zip").await;
    set_permissions(&locked, Permissions::from_mode(0o755)).unwrap();

    assert_eq!(
        result.err().as_ref().map(|err| &err.etype),
        Some(&STREAMING_FAILURE)
    );
    assert_eq!(status(&result), 200);
    assert!(result.session().is_aborted());
    assert!(!result
        .body()
        .windows(4)
        .any(|window| window == b"PK\x05\x06"));
}

#[test(tokio::test)]
async fn real_zip_precedence() {
    let dir = make_fixture();
    let app = make_app(&dir, "");

    let result = get(&app, "/test/dir_with_zip/dir.zip").await;
    assert!(result.err().is_none());
    assert_eq!(status(&result), 200);
    assert_eq!(header(&result, "Content-Type"), Some("application/zip"));
    assert_eq!(
        header(&result, "Content-Disposition"),
        Some("attachment; filename=\"dir.zip\"")
    );
    assert!(header(&result, "ETag").is_some());
    assert_eq!(
        zip_contents(result.body())
            .into_iter()
            .map(|(name, _)| name)
            .collect::<Vec<_>>(),
        vec!["1", "2", "3", "4"]
    );
}

#[test(tokio::test)]
async fn directory_redirect() {
    let dir = make_fixture();
    let app = make_app(&dir, "");

    let result = get(&app, "/test/testdir").await;
    assert!(result.err().is_none());
    assert_eq!(status(&result), 301);
    assert_eq!(header(&result, "Location"), Some("/test/testdir/"));

    let result = get(&app, "/test/testdir/directory?sort=name").await;
    assert_eq!(status(&result), 301);
    assert_eq!(
        header(&result, "Location"),
        Some("/test/testdir/directory/?sort=name")
    );

    let result = get(&app, "/test").await;
    assert_eq!(status(&result), 301);
    assert_eq!(header(&result, "Location"), Some("/test/"));

    let result = get(&app, "/test/./testdir/directory/..").await;
    assert_eq!(status(&result), 301);
    assert_eq!(header(&result, "Location"), Some("/test/testdir/"));
}

#[test(tokio::test)]
async fn listing() {
    let dir = make_fixture();
    let app = make_app(&dir, "");

    let result = get(&app, "/test/testdir/").await;
    assert!(result.err().is_none());
    assert_eq!(status(&result), 200);
    assert_eq!(
        header(&result, "Content-Type"),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(
        header(&result, "Content-Length"),
        Some(result.body().len().to_string().as_str())
    );

    let body = result.body_str();
    assert!(body.contains("<title>/test/testdir</title>"));
    assert!(body.contains(r#"href="../""#));
    assert!(body.contains(r#"href="directory/""#));
    assert!(body.contains(r#"href="directory.zip""#));
    assert!(body.contains(r#"href="patates""#));
    assert!(body.contains(r#"href="zipfile.zip""#));
    assert!(!body.contains(".hidden"));
    assert!(!body.contains("symlink"));

    let position = |needle: &str| body.find(needle).unwrap();
    assert!(position(r#"href="directory/""#) < position(r#"href="patates""#));
    assert!(position(r#"href="patates""#) < position(r#"href="zipfile.zip""#));

    // No parent link at the mount root
    let result = get(&app, "/test/").await;
    assert_eq!(status(&result), 200);
    assert!(!result.body_str().contains(r#"href="../""#));
    assert!(result.body_str().contains(r#"href="testdir/""#));
}

#[cfg(unix)]
#[test(tokio::test)]
async fn colon_names() {
    let dir = make_fixture();
    write(dir.path().join("testdir/javascript:alert(1)"), "script").unwrap();
    write(dir.path().join("testdir/notes:v2.txt"), "notes").unwrap();
    let app = make_app(&dir, "");

    let result = get(&app, "/test/testdir/").await;
    let body = result.body_str();
    assert!(body.contains(r#"<a class="file" href="javascript%3Aalert(1)">"#));
    assert!(body.contains(r#"<a class="file" href="notes%3Av2.txt">"#));
    assert!(!body.contains(r#"href="javascript:"#));
    assert!(!body.contains(r#"href="notes:"#));

    let result = get(&app, "/test/testdir/notes%3Av2.txt").await;
    assert_eq!(status(&result), 200);
    assert_eq!(result.body_str(), "notes");
}

#[test(tokio::test)]
async fn index_file() {
    let dir = make_fixture();
    let app = make_app(&dir, "");

    // Listings by default, index files are opt-in
    let result = get(&app, "/test/dir_with_index/").await;
    assert_eq!(status(&result), 200);
    assert!(result.body_str().contains(r#"href="index.html""#));
    assert!(result.body_str().contains(r#"href="other""#));
    assert!(result.body_str().contains(r#"class="zip""#));

    let conf = make_conf(format!(
        "mounts:\n  /test: \"{}\"\nindex_file: [missing.html, index.html]",
        root_str(&dir)
    ));
    let app = DefaultApp::<DirZipHandler>::from_conf(conf).unwrap();
    let result = get(&app, "/test/dir_with_index/").await;
    assert!(result.err().is_none());
    assert_eq!(status(&result), 200);
    assert_eq!(
        header(&result, "Content-Type"),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(result.body_str(), "<h1>index</h1>");

    let result = get(&app, "/test/dir_with_index").await;
    assert_eq!(status(&result), 301);

    let result = get(&app, "/test/testdir/").await;
    assert!(result.body_str().contains(r#"href="patates""#));
}

#[test(tokio::test)]
async fn no_autoindex() {
    let dir = make_fixture();
    let app = make_app(&dir, ":noautoindex");

    assert_not_found(&get(&app, "/test/").await);
    assert_not_found(&get(&app, "/test/testdir").await);
    assert_not_found(&get(&app, "/test/testdir/").await);
    assert_not_found(&get(&app, "/test/dir_with_index/").await);

    let result = get(&app, "/test/testdir/patates").await;
    assert_eq!(status(&result), 200);
    assert_eq!(result.body_str(), "des patates\n");

    let result = get(&app, "/test/testdir.zip").await;
    assert_eq!(status(&result), 200);
    assert_eq!(zip_contents(result.body()).len(), 4);
}

#[test(tokio::test)]
async fn no_archive() {
    let dir = make_fixture();
    let app = make_app(&dir, ":nodirzip");

    assert_not_found(&get(&app, "/test/testdir.zip").await);
    assert_not_found(&get(&app, "/test/testdir/directory.zip").await);

    let result = get(&app, "/test/testdir/").await;
    assert_eq!(status(&result), 200);
    assert!(result.body_str().contains(r#"href="directory/""#));
    assert!(!result.body_str().contains(r#"href="directory.zip""#));

    // Real ZIP files are still served
    let result = get(&app, "/test/dir_with_zip/dir.zip").await;
    assert_eq!(status(&result), 200);
    assert_eq!(zip_contents(result.body()).len(), 4);
}

#[test(tokio::test)]
async fn files_only() {
    let dir = make_fixture();
    let app = make_app(&dir, ":noautoindex,nodirzip");

    assert_not_found(&get(&app, "/test/testdir/").await);
    assert_not_found(&get(&app, "/test/testdir.zip").await);

    let result = get(&app, "/test/testdir/patates").await;
    assert_eq!(status(&result), 200);
}

#[test]
fn invalid_configuration() {
    let dir = make_fixture();
    let root = root_str(&dir);

    for definition in [
        format!("{root}:"),
        format!("{root}:invalid"),
        format!("{root}:invalid1,invalid2"),
        format!("{root}:noautoindex,invalid"),
        format!("{root}:noautoindex,,nodirzip"),
        format!("{root}/missing"),
        format!("{root}/empty.txt"),
    ] {
        let conf = make_conf(format!("mounts:\n  /test: \"{definition}\""));
        let err = DirZipHandler::try_from(conf).unwrap_err();
        assert_eq!(err.etype, CONFIG_ERROR, "{definition}");
    }

    let conf = make_conf(format!("mounts:\n  test: \"{root}\""));
    assert_eq!(
        DirZipHandler::try_from(conf).unwrap_err().etype,
        CONFIG_ERROR
    );

    let conf = make_conf(format!(
        "mounts:\n  /test: \"{root}\"\n  /test/: \"{root}/testdir\""
    ));
    assert_eq!(
        DirZipHandler::try_from(conf).unwrap_err().etype,
        CONFIG_ERROR
    );

    assert_eq!(
        DirZipHandler::try_from(DirZipConf::default())
            .unwrap_err()
            .etype,
        CONFIG_ERROR
    );
}

#[test(tokio::test)]
async fn nested_mounts() {
    let dir = make_fixture();
    let root = root_str(&dir);
    let conf = make_conf(format!(
        "mounts:\n  /test: \"{root}\"\n  /test/testdir: \"{root}/dir_with_index:nodirzip\"\nindex_file: [index.html]"
    ));
    let app = DefaultApp::<DirZipHandler>::from_conf(conf).unwrap();
    assert_eq!(app.handler().mounts().len(), 2);

    let result = get(&app, "/test/testdir/").await;
    assert_eq!(result.body_str(), "<h1>index</h1>");

    let result = get(&app, "/test/testdir/other").await;
    assert_eq!(result.body_str(), "other");

    assert_not_found(&get(&app, "/test/testdir/patates").await);

    // Archive of the nested mount’s directory is handled by the outer mount
    let result = get(&app, "/test/testdir.zip").await;
    assert_eq!(status(&result), 200);
}

#[test(tokio::test)]
async fn method_not_allowed() {
    let dir = make_fixture();
    let app = make_app(&dir, "");

    for path in ["/test/testdir/patates", "/test/testdir/", "/test/testdir.zip"] {
        let result = app.handle_request(make_session("POST", path)).await;
        assert_eq!(status(&result), 405, "{path}");
        assert_eq!(result.body_str(), "Method Not Allowed");
    }

    assert_not_found(&app.handle_request(make_session("POST", "/test/missing")).await);
}

#[test(tokio::test)]
async fn head_requests() {
    let dir = make_fixture();
    let app = make_app(&dir, "");

    let result = app
        .handle_request(make_session("HEAD", "/test/testdir/patates"))
        .await;
    assert_eq!(status(&result), 200);
    assert_eq!(header(&result, "Content-Length"), Some("12"));
    assert_eq!(result.body_str(), "");

    let result = app
        .handle_request(make_session("HEAD", "/test/testdir.zip"))
        .await;
    assert_eq!(status(&result), 200);
    assert_eq!(header(&result, "Content-Type"), Some("application/zip"));
    assert_eq!(result.body_str(), "");

    let result = app
        .handle_request(make_session("HEAD", "/test/testdir/"))
        .await;
    assert_eq!(status(&result), 200);
    assert!(header(&result, "Content-Length").is_some());
    assert_eq!(result.body_str(), "");

    let result = app.handle_request(make_session("HEAD", "/test/missing")).await;
    assert_eq!(status(&result), 404);
    assert_eq!(result.body_str(), "");
}

#[test(tokio::test)]
async fn ranges() {
    let dir = make_fixture();
    let app = make_app(&dir, "");

    let mut session = make_session("GET", "/test/testdir/patates");
    session
        .req_header_mut()
        .insert_header("Range", "bytes=4-10")
        .unwrap();
    let result = app.handle_request(session).await;
    assert_eq!(status(&result), 206);
    assert_eq!(header(&result, "Content-Range"), Some("bytes 4-10/12"));
    assert_eq!(header(&result, "Content-Length"), Some("7"));
    assert_eq!(result.body_str(), "patates");

    let mut session = make_session("GET", "/test/testdir/patates");
    session
        .req_header_mut()
        .insert_header("Range", "bytes=20-")
        .unwrap();
    let result = app.handle_request(session).await;
    assert_eq!(status(&result), 416);
    assert_eq!(header(&result, "Content-Range"), Some("bytes */12"));
    assert_eq!(result.body_str(), "");
}

#[test(tokio::test)]
async fn conditional_requests() {
    let dir = make_fixture();
    let app = make_app(&dir, "");
    let meta = file_meta(&dir, "testdir/patates");

    let mut session = make_session("GET", "/test/testdir/patates");
    session
        .req_header_mut()
        .insert_header("If-None-Match", meta.etag.as_str())
        .unwrap();
    let result = app.handle_request(session).await;
    assert_eq!(status(&result), 304);
    assert_eq!(result.body_str(), "");

    let mut session = make_session("GET", "/test/testdir/patates");
    session
        .req_header_mut()
        .insert_header("If-Match", "\"xyz\"")
        .unwrap();
    let result = app.handle_request(session).await;
    assert_eq!(status(&result), 412);
    assert_eq!(result.body_str(), "");

    let mut session = make_session("GET", "/test/testdir/patates");
    session
        .req_header_mut()
        .insert_header("If-None-Match", "\"xyz\"")
        .unwrap();
    let result = app.handle_request(session).await;
    assert_eq!(status(&result), 200);
    assert_eq!(result.body_str(), "des patates\n");
}
