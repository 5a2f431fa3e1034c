use async_trait::async_trait;
use sqlx::PgPool;

use super::{RequestHandler, Responder, Service, ServiceError};
use crate::{
    models::posts::{
        CreatePostRequest, ImageUploadReport, Post, PostFilter, PostListing, RemoveImageRequest,
        UpdatePostRequest, UploadedFile,
    },
    repositories::{
        posts::PostRepository,
        storage::{check_image, FileStore},
    },
};

const IMAGE_PREFIX: &str = "post-files";

pub enum PostRequest {
    Create {
        user_id: String,
        request: CreatePostRequest,
        response: Responder<Post>,
    },
    Update {
        user_id: String,
        request: UpdatePostRequest,
        response: Responder<Post>,
    },
    Search {
        user_id: Option<String>,
        filter: PostFilter,
        response: Responder<Vec<PostListing>>,
    },
    Mine {
        user_id: String,
        response: Responder<Vec<Post>>,
    },
    Get {
        post_id: String,
        response: Responder<Post>,
    },
    AttachImages {
        user_id: String,
        post_id: Option<String>,
        files: Vec<UploadedFile>,
        response: Responder<ImageUploadReport>,
    },
    RemoveImage {
        user_id: String,
        request: RemoveImageRequest,
        response: Responder<Post>,
    },
    Delete {
        user_id: String,
        post_id: Option<String>,
        response: Responder<()>,
    },
}

#[derive(Clone)]
pub struct PostRequestHandler {
    repository: PostRepository,
    store: FileStore,
    max_file_bytes: usize,
}

fn required(value: Option<String>, name: &str) -> Result<String, ServiceError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::Validation(format!("{} is required", name)))
}

impl PostRequestHandler {
    pub fn new(sql_conn: PgPool, store: FileStore, max_file_bytes: usize) -> Self {
        let repository = PostRepository::new(sql_conn);

        PostRequestHandler {
            repository,
            store,
            max_file_bytes,
        }
    }

    async fn post(&self, post_id: &str) -> Result<Post, ServiceError> {
        self.repository
            .get_post(post_id)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(|| ServiceError::NotFound("Post not found".to_string()))
    }

    async fn owned_post(&self, user_id: &str, post_id: &str) -> Result<Post, ServiceError> {
        let post = self.post(post_id).await?;
        if post.created_by != user_id {
            return Err(ServiceError::Forbidden(
                "Only the owner can modify this post".to_string(),
            ));
        }

        Ok(post)
    }

    async fn create(&self, user_id: &str, request: CreatePostRequest) -> Result<Post, ServiceError> {
        let mut data = request
            .post_data
            .ok_or_else(|| ServiceError::Validation("postData is required".to_string()))?;
        data.normalize_location().map_err(ServiceError::Validation)?;
        // Storage keys are only ever written by the upload path.
        data.s3_keys.clear();

        let post = self
            .repository
            .insert_post(user_id, data, request.is_submit, request.step)
            .await
            .map_err(ServiceError::database)?;

        log::info!("User {} created post {}.", user_id, post.id);

        Ok(post)
    }

    async fn update(&self, user_id: &str, request: UpdatePostRequest) -> Result<Post, ServiceError> {
        let post_id = required(request.post_id, "postId")?;
        let mut data = request
            .post_data
            .ok_or_else(|| ServiceError::Validation("postData is required".to_string()))?;
        let existing = self.owned_post(user_id, &post_id).await?;

        data.normalize_location().map_err(ServiceError::Validation)?;
        data.post_image = existing.post_data.0.post_image;
        data.s3_keys = existing.post_data.0.s3_keys;

        self.repository
            .update_post(&post_id, data, request.is_submit, request.step)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(|| ServiceError::NotFound("Post not found".to_string()))
    }

    async fn search(
        &self,
        user_id: Option<&str>,
        filter: &PostFilter,
    ) -> Result<Vec<PostListing>, ServiceError> {
        if matches!(filter.max_distance_km, Some(km) if km < 0.0) {
            return Err(ServiceError::Validation(
                "maxDistanceKm must not be negative".to_string(),
            ));
        }

        let mut listings = self
            .repository
            .search_posts(filter)
            .await
            .map_err(ServiceError::database)?;

        if let Some(user_id) = user_id {
            for listing in listings.iter_mut() {
                listing.is_owner = Some(listing.post.created_by == user_id);
            }
        }

        Ok(listings)
    }

    async fn mine(&self, user_id: &str) -> Result<Vec<Post>, ServiceError> {
        self.repository
            .get_posts_by_owner(user_id)
            .await
            .map_err(ServiceError::database)
    }

    async fn attach_images(
        &self,
        user_id: &str,
        post_id: Option<String>,
        files: Vec<UploadedFile>,
    ) -> Result<ImageUploadReport, ServiceError> {
        let post_id = required(post_id, "postId")?;
        if files.is_empty() {
            return Err(ServiceError::Validation("No files uploaded".to_string()));
        }
        let post = self.owned_post(user_id, &post_id).await?;

        let mut uploaded = Vec::new();
        let mut upload_errors = Vec::new();
        for file in files {
            if file.bytes.len() > self.max_file_bytes {
                upload_errors.push(format!("{} exceeds the size limit", file.original_name));
                continue;
            }
            if let Err(e) = check_image(&file.original_name, &file.mimetype) {
                upload_errors.push(e);
                continue;
            }
            match self
                .store
                .put(IMAGE_PREFIX, &file.original_name, &file.bytes)
                .await
            {
                Ok(object) => uploaded.push(object),
                Err(e) => {
                    log::error!("Could not store {}: {:#}", file.original_name, e);
                    upload_errors.push(format!("Failed to upload {}", file.original_name));
                }
            }
        }

        if uploaded.is_empty() {
            return Ok(ImageUploadReport {
                message: "All image uploads failed".to_string(),
                uploaded_files: Vec::new(),
                total_images: post.post_data.0.post_image.len(),
                new_images_added: 0,
                post,
                partial_success: false,
                upload_errors,
            });
        }

        let mut data = post.post_data.0.clone();
        let mut new_images_added = 0;
        for object in &uploaded {
            if !data.post_image.contains(&object.url) {
                data.post_image.push(object.url.clone());
                new_images_added += 1;
            }
            if !data.s3_keys.contains(&object.key) {
                data.s3_keys.push(object.key.clone());
            }
        }

        let updated = match self
            .repository
            .update_post(&post_id, data, None, None)
            .await
        {
            Ok(Some(updated)) => updated,
            result => {
                for object in &uploaded {
                    if let Err(e) = self.store.delete(&object.key).await {
                        log::warn!("Could not clean up {}: {:#}", object.key, e);
                    }
                }
                return match result {
                    Err(e) => Err(ServiceError::database(e)),
                    _ => Err(ServiceError::NotFound("Post not found".to_string())),
                };
            }
        };

        log::info!("Attached {} image(s) to post {}.", new_images_added, post_id);

        Ok(ImageUploadReport {
            message: "Images uploaded successfully".to_string(),
            uploaded_files: uploaded.into_iter().map(|object| object.url).collect(),
            total_images: updated.post_data.0.post_image.len(),
            new_images_added,
            partial_success: !upload_errors.is_empty(),
            upload_errors,
            post: updated,
        })
    }

    async fn remove_image(
        &self,
        user_id: &str,
        request: RemoveImageRequest,
    ) -> Result<Post, ServiceError> {
        let post_id = required(request.post_id, "postId")?;
        let image_url = required(request.image_url, "imageUrl")?;
        let post = self.owned_post(user_id, &post_id).await?;

        let mut data = post.post_data.0;
        let before = data.post_image.len();
        data.post_image.retain(|url| url != &image_url);
        if data.post_image.len() == before {
            return Err(ServiceError::NotFound(
                "Image not found in post".to_string(),
            ));
        }

        let key = self.store.key_for_url(&image_url);
        if let Some(key) = &key {
            data.s3_keys.retain(|k| k != key);
        }

        let updated = self
            .repository
            .update_post(&post_id, data, None, None)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(|| ServiceError::NotFound("Post not found".to_string()))?;

        if let Some(key) = key {
            if let Err(e) = self.store.delete(&key).await {
                log::warn!("Could not delete stored image {}: {:#}", key, e);
            }
        }

        Ok(updated)
    }

    async fn delete(&self, user_id: &str, post_id: Option<String>) -> Result<(), ServiceError> {
        let post_id = required(post_id, "postId")?;
        let post = self.owned_post(user_id, &post_id).await?;

        let bookings = self
            .repository
            .count_bookings(&post_id)
            .await
            .map_err(ServiceError::database)?;
        if bookings > 0 {
            return Err(ServiceError::Conflict(
                "Posts with bookings cannot be deleted".to_string(),
            ));
        }

        let deleted = self
            .repository
            .delete_post(&post_id)
            .await
            .map_err(ServiceError::database)?;
        if !deleted {
            return Err(ServiceError::NotFound("Post not found".to_string()));
        }

        for key in &post.post_data.0.s3_keys {
            if let Err(e) = self.store.delete(key).await {
                log::warn!("Could not delete stored image {}: {:#}", key, e);
            }
        }

        log::info!("User {} deleted post {}.", user_id, post_id);

        Ok(())
    }
}

#[async_trait]
impl RequestHandler<PostRequest> for PostRequestHandler {
    async fn handle_request(&self, request: PostRequest) {
        match request {
            PostRequest::Create {
                user_id,
                request,
                response,
            } => {
                let post = self.create(&user_id, request).await;
                let _ = response.send(post);
            }
            PostRequest::Update {
                user_id,
                request,
                response,
            } => {
                let post = self.update(&user_id, request).await;
                let _ = response.send(post);
            }
            PostRequest::Search {
                user_id,
                filter,
                response,
            } => {
                let listings = self.search(user_id.as_deref(), &filter).await;
                let _ = response.send(listings);
            }
            PostRequest::Mine { user_id, response } => {
                let posts = self.mine(&user_id).await;
                let _ = response.send(posts);
            }
            PostRequest::Get { post_id, response } => {
                let post = self.post(&post_id).await;
                let _ = response.send(post);
            }
            PostRequest::AttachImages {
                user_id,
                post_id,
                files,
                response,
            } => {
                let report = self.attach_images(&user_id, post_id, files).await;
                let _ = response.send(report);
            }
            PostRequest::RemoveImage {
                user_id,
                request,
                response,
            } => {
                let post = self.remove_image(&user_id, request).await;
                let _ = response.send(post);
            }
            PostRequest::Delete {
                user_id,
                post_id,
                response,
            } => {
                let result = self.delete(&user_id, post_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct PostService;

impl PostService {
    pub fn new() -> Self {
        PostService {}
    }
}

#[async_trait]
impl Service<PostRequest, PostRequestHandler> for PostService {}
