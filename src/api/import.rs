use rocket::{
    form::Form,
    fs::TempFile,
    serde::json::Json,
    tokio::io::AsyncReadExt,
    Route, State,
};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            auth::{AuthToken, Staff},
            import::{read_workbook, ImportRow, ImportSummary},
            user::{check_password, Profile},
        },
        cipher::FieldCipher,
        common::Role,
        db::user::{NewUser, UserCore},
        mongodb::{is_duplicate_key, Coll, Id},
    },
};

pub fn routes() -> Vec<Route> {
    routes![upload_users]
}

#[derive(FromForm)]
struct Upload<'r> {
    file: Option<TempFile<'r>>,
}

/// Read an uploaded file fully into memory.
async fn read_upload(file: &TempFile<'_>) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let reader = file.open().await?;
    rocket::tokio::pin!(reader);
    reader.read_to_end(&mut bytes).await?;
    Ok(bytes)
}

/// Build the user a row describes.
fn user_from_row(row: &ImportRow, importer: Id, cipher: &FieldCipher) -> Result<NewUser> {
    let profile = Profile::parse(row.name(), row.email(), row.phone(), row.address())?;
    if row.password.trim().is_empty() {
        return Err(Error::Validation("All fields are required".to_string()));
    }
    check_password(&row.password)?;
    UserCore::new(&profile, &row.password, Role::Employee, Some(importer), cipher)
}

#[post("/api/auth/upload-users", data = "<upload>")]
async fn upload_users(
    token: AuthToken<Staff>,
    upload: Form<Upload<'_>>,
    new_users: Coll<NewUser>,
    cipher: &State<FieldCipher>,
) -> Result<Json<ImportSummary>> {
    let file = upload
        .file
        .as_ref()
        .filter(|file| file.len() > 0)
        .ok_or_else(|| Error::Validation("No file uploaded".to_string()))?;
    let rows = read_workbook(read_upload(file).await?)?;

    // Each row stands alone; a bad row never aborts the batch.
    let mut summary = ImportSummary::new(rows.len());
    for row in &rows {
        let user = match user_from_row(row, token.id, cipher) {
            Ok(user) => user,
            Err(e) => {
                summary.record_failure(row, &e);
                continue;
            }
        };
        match new_users.insert_one(&user, None).await {
            Ok(_) => summary.record_inserted(),
            Err(e) if is_duplicate_key(&e) => summary.record_existing(row),
            Err(e) => {
                warn!("Failed to import a row: {e}");
                summary.record_failure(row, &Error::Db(e));
            }
        }
    }
    info!(
        "User {} imported {} of {} users ({} already present, {} failed)",
        token.id,
        summary.inserted,
        summary.total,
        summary.already_users.len(),
        summary.failed_users.len()
    );

    Ok(Json(summary))
}
