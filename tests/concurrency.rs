mod common;

use common::*;
use serde_json::json;

use scour::{Backend, Payload, Stored};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_parallel_reads_each_join_the_instance_set() {
  let (backend, cache) = memory_cache().await;
  let p = params(&[("id", json!(1))]);

  let mut tasks = Vec::new();
  for i in 0..50 {
    let cache = cache.clone();
    let p = p.clone();
    tasks.push(tokio::spawn(async move {
      cache
        .read(&format!("q_{}", i), &p, None, || async {
          Ok::<_, Boom>(Payload::One(user(1, "alice")))
        })
        .await
        .unwrap()
    }));
  }
  for task in tasks {
    assert_eq!(task.await.unwrap(), Payload::One(user(1, "alice")));
  }

  let members = backend
    .set_members("__set:User:1")
    .await
    .unwrap()
    .expect("instance set populated");
  assert_eq!(members.len(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_fallback_inserts_lose_no_members() {
  let (backend, cache) = kv_only_cache().await;
  let p = params(&[("id", json!(1))]);

  let mut tasks = Vec::new();
  for i in 0..32 {
    let cache = cache.clone();
    let p = p.clone();
    tasks.push(tokio::spawn(async move {
      cache
        .read(&format!("q_{}", i), &p, None, || async {
          Ok::<_, Boom>(Payload::One(user(1, "alice")))
        })
        .await
        .unwrap();
    }));
  }
  for task in tasks {
    task.await.unwrap();
  }

  // All 32 memberships survived the serialized read-modify-writes.
  match backend.get("__set:User:1").await.unwrap() {
    Some(Stored::Ids(ids)) => assert_eq!(ids.len(), 32),
    other => panic!("expected emulated id set, got {:?}", other),
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mutations_converge_to_eviction() {
  let (_backend, cache) = memory_cache().await;
  let p = params(&[("id", json!(1))]);

  cache
    .read("find_user", &p, None, || async {
      Ok::<_, Boom>(Payload::One(user(1, "v0")))
    })
    .await
    .unwrap();

  let mut tasks = Vec::new();
  for i in 0..10 {
    let update_cache = cache.clone();
    tasks.push(tokio::spawn(async move {
      update_cache
        .update(move || async move { Ok::<_, Boom>(user(1, &format!("v{}", i))) })
        .await
        .unwrap();
    }));
    let cache = cache.clone();
    let p = p.clone();
    tasks.push(tokio::spawn(async move {
      let _ = cache
        .read("find_user", &p, None, || async {
          Ok::<_, Boom>(Payload::One(user(1, "refetched")))
        })
        .await;
    }));
  }
  for task in tasks {
    task.await.unwrap();
  }

  // After the dust settles one final mutation leaves the entry absent.
  cache.flush(&user(1, "any")).await.unwrap();
  assert!(!cache.contains("find_user", &p).await);
}
