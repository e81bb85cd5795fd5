use super::*;
use crate::backend::mock::{mock_database, mock_db, MockHandle};
use crate::config::ConnectionConfig;
use crate::result::Record;
use crate::{Database, Value};

fn record(pairs: &[(&str, Value)]) -> Record {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn rows(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            record(&[
                ("id", Value::from(i as i64)),
                ("name", Value::from(format!("row-{}", i))),
            ])
        })
        .collect()
}

fn prefixed_db() -> (Database, MockHandle) {
    mock_database(ConnectionConfig::new("mock").prefix("app_"))
}

#[test]
fn test_simple_select() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.select("id, name")
        .from("users")
        .where_("age >", 18)
        .order_by("name", "asc")
        .limit(10);

    assert_eq!(
        qb.compile_select(),
        "SELECT `id`, `name` FROM `users` WHERE `age` > 18 ORDER BY `name` ASC LIMIT 10"
    );
}

#[test]
fn test_select_star_without_columns() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    assert_eq!(qb.get_compiled_select(Some("users"), true), "SELECT * FROM `users`");
}

#[test]
fn test_distinct() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.distinct(true).select("name").from("users");
    assert_eq!(qb.compile_select(), "SELECT DISTINCT `name` FROM `users`");
}

#[test]
fn test_where_and_or_where() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.from("users").where_("a", 1).or_where("b", "x");
    assert_eq!(qb.compile_select(), "SELECT * FROM `users` WHERE `a` = 1 OR `b` = 'x'");
}

#[test]
fn test_first_condition_drops_its_connector() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.from("users").or_where("a", 1).where_("b", 2);
    assert_eq!(qb.compile_select(), "SELECT * FROM `users` WHERE `a` = 1 AND `b` = 2");
}

#[test]
fn test_where_null() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.from("users").where_null("deleted_at");
    assert_eq!(qb.compile_select(), "SELECT * FROM `users` WHERE `deleted_at` IS NULL");
}

#[test]
fn test_where_escapes_values() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.from("users").where_("name", "O'Neil");
    assert_eq!(qb.compile_select(), "SELECT * FROM `users` WHERE `name` = 'O\\'Neil'");
}

#[test]
fn test_where_in() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.from("users").where_in("id", [1, 2, 3]).or_where_not_in("role", ["admin"]);
    assert_eq!(
        qb.compile_select(),
        "SELECT * FROM `users` WHERE `id` IN (1, 2, 3) OR `role` NOT IN ('admin')"
    );
}

#[test]
fn test_where_in_empty_list_is_noop() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.from("users").where_in("id", Vec::<i64>::new());
    assert_eq!(qb.compile_select(), "SELECT * FROM `users`");
}

#[test]
fn test_like_sides() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.from("posts")
        .like("title", "rust", LikeSide::Both)
        .or_like("title", "go", LikeSide::Before)
        .not_like("body", "spam", LikeSide::After)
        .or_not_like("body", "ads", LikeSide::None);
    assert_eq!(
        qb.compile_select(),
        "SELECT * FROM `posts` WHERE `title` LIKE '%rust%' OR `title` LIKE '%go' \
         AND `body` NOT LIKE 'spam%' OR `body` NOT LIKE 'ads'"
    );
}

#[test]
fn test_like_escapes_wildcards() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.from("t").like("rate", "50%", LikeSide::After);
    assert_eq!(qb.compile_select(), "SELECT * FROM `t` WHERE `rate` LIKE '50\\%%'");
}

#[test]
fn test_where_followed_by_like() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.from("users").where_("a", 1).like("name", "bo", LikeSide::Both);
    assert_eq!(
        qb.compile_select(),
        "SELECT * FROM `users` WHERE `a` = 1 AND `name` LIKE '%bo%'"
    );
}

#[test]
fn test_join_with_aliases() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.select("u.name, p.title")
        .from("users u")
        .join("posts p", "p.user_id = u.id", "left");
    assert_eq!(
        qb.compile_select(),
        "SELECT `u`.`name`, `p`.`title` FROM `users` u LEFT JOIN `posts` p ON `p`.`user_id` = `u`.`id`"
    );
}

#[test]
fn test_join_unknown_kind_is_plain_join() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.from("users").join("posts", "posts.user_id = users.id", "sideways");
    assert_eq!(
        qb.compile_select(),
        "SELECT * FROM `users` JOIN `posts` ON `posts`.`user_id` = `users`.`id`"
    );
}

#[test]
fn test_aggregates() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.select_max("age", None).unwrap();
    qb.select_sum("orders.total", Some("revenue")).unwrap();
    qb.from("users");
    assert_eq!(
        qb.compile_select(),
        "SELECT MAX(`age`) AS age, SUM(`orders`.`total`) AS revenue FROM `users`"
    );
}

#[test]
fn test_invalid_aggregate_is_refused() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    let err = qb.select_aggregate("median", "age", None).unwrap_err();
    assert!(err.is_usage());
    assert!(err.to_string().contains("median"));
    assert!(qb.select_min("  ", None).unwrap_err().is_usage());
}

#[test]
fn test_group_by_and_having() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.select("dept")
        .select("COUNT(*) AS n")
        .from("emp")
        .group_by("dept")
        .having("n >", 3);
    assert_eq!(
        qb.compile_select(),
        "SELECT `dept`, COUNT(*) AS n FROM `emp` GROUP BY `dept` HAVING `n` > 3"
    );
}

#[test]
fn test_order_random_and_desc() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.from("users").order_by("created", "desc").order_by("", "random");
    assert_eq!(
        qb.compile_select(),
        "SELECT * FROM `users` ORDER BY `created` DESC, RAND()"
    );
}

#[test]
fn test_limit_and_offset() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.from("users").limit(10).offset(20);
    assert_eq!(qb.compile_select(), "SELECT * FROM `users` LIMIT 20, 10");
}

#[test]
fn test_prefix_applies_to_tables_and_qualified_columns() {
    let (mut db, _) = prefixed_db();
    let mut qb = db.qb().unwrap();
    qb.select("users.name").from("users").where_("users.id", 1);
    assert_eq!(
        qb.compile_select(),
        "SELECT `app_users`.`name` FROM `app_users` WHERE `app_users`.`id` = 1"
    );
}

#[test]
fn test_prefix_not_applied_to_aliases() {
    let (mut db, _) = prefixed_db();
    let mut qb = db.qb().unwrap();
    qb.select("u.name").from("users u").order_by("u.name", "asc");
    assert_eq!(
        qb.compile_select(),
        "SELECT `u`.`name` FROM `app_users` u ORDER BY `u`.`name` ASC"
    );
}

#[test]
fn test_compile_is_repeatable() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.select("id").from("users").where_("a", 1).limit(5);
    let first = qb.compile_select();
    let second = qb.compile_select();
    assert_eq!(first, second);
}

fn report_chain(qb: &mut QueryBuilder<'_>) {
    qb.select("u.id, u.name")
        .from("users u")
        .join("posts p", "p.user_id = u.id", "left")
        .where_("u.active", 1)
        .or_like("u.name", "ann", LikeSide::After)
        .group_by("u.id")
        .having("COUNT(p.id) >", 1)
        .order_by("u.name", "desc")
        .limit(10)
        .offset(20);
}

#[test]
fn test_rebuilt_chain_compiles_identically() {
    let (mut db, _) = prefixed_db();
    let mut qb = db.qb().unwrap();
    report_chain(&mut qb);
    let first = qb.compile_select();

    qb.reset_query();
    assert_eq!(qb.compile_select(), "SELECT *");

    report_chain(&mut qb);
    assert_eq!(qb.compile_select(), first);
}

#[test]
fn test_get_runs_and_resets() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.select("id").where_("a", 1);
    qb.get(Some("users")).unwrap();
    assert_eq!(script.last_statement().unwrap(), "SELECT `id` FROM `users` WHERE `a` = 1");

    qb.get(Some("users")).unwrap();
    assert_eq!(script.last_statement().unwrap(), "SELECT * FROM `users`");
}

#[test]
fn test_get_resets_even_on_failure() {
    let (mut db, script) = mock_db();
    script.fail_on("broken");
    let mut qb = db.qb().unwrap();
    qb.where_("a", 1);
    assert!(qb.get(Some("broken")).is_err());
    assert_eq!(qb.get_compiled_select(Some("users"), true), "SELECT * FROM `users`");
}

#[test]
fn test_get_where() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.get_where(Some("users"), &[("id", Value::from(5))], Some(1), None)
        .unwrap();
    assert_eq!(script.last_statement().unwrap(), "SELECT * FROM `users` WHERE `id` = 5 LIMIT 1");
}

#[test]
fn test_count_all_results() {
    let (mut db, script) = mock_db();
    script.respond("COUNT(*)", &["numrows"], vec![vec![Value::Int(42)]]);
    let mut qb = db.qb().unwrap();
    qb.where_("active", 1);
    assert_eq!(qb.count_all_results(Some("users")).unwrap(), 42);
    assert_eq!(
        script.last_statement().unwrap(),
        "SELECT COUNT(*) AS `numrows` FROM `users` WHERE `active` = 1"
    );
}

#[test]
fn test_cache_snapshot_survives_terminals() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.start_cache();
    qb.select("id").from("users");
    qb.stop_cache();

    qb.where_("a", 1);
    qb.get(None).unwrap();
    assert_eq!(script.last_statement().unwrap(), "SELECT `id` FROM `users` WHERE `a` = 1");

    qb.get(None).unwrap();
    assert_eq!(script.last_statement().unwrap(), "SELECT `id` FROM `users`");

    qb.flush_cache();
    assert_eq!(qb.get_compiled_select(Some("posts"), true), "SELECT * FROM `posts`");
}

#[test]
fn test_cache_merges_across_terminals_while_caching() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.start_cache();
    qb.select("a");
    qb.get(Some("t")).unwrap();
    assert_eq!(script.last_statement().unwrap(), "SELECT `a` FROM `t`");

    qb.select("b");
    qb.get(Some("t")).unwrap();
    assert_eq!(script.last_statement().unwrap(), "SELECT `a`, `b` FROM `t`");

    qb.stop_cache();
    qb.flush_cache();
    qb.select("c");
    qb.get(Some("t")).unwrap();
    assert_eq!(script.last_statement().unwrap(), "SELECT `c` FROM `t`");
}

#[test]
fn test_cached_condition_precedes_live_condition() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.start_cache();
    qb.where_("tenant", 7);
    qb.stop_cache();
    qb.reset_query();

    qb.from("users").where_("a", 1);
    assert_eq!(
        qb.compile_select(),
        "SELECT * FROM `users` WHERE `tenant` = 7 AND `a` = 1"
    );
}

#[test]
fn test_insert() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.set("name", "bob").set("age", 3);
    qb.insert(Some("users")).unwrap();
    assert_eq!(
        script.last_statement().unwrap(),
        "INSERT INTO `users` (`name`, `age`) VALUES ('bob', 3)"
    );

    assert!(qb.insert(Some("users")).unwrap_err().is_usage());
}

#[test]
fn test_insert_record_and_set_raw() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.insert_record(Some("users"), &record(&[("name", Value::from("amy"))]))
        .unwrap();
    assert_eq!(script.last_statement().unwrap(), "INSERT INTO `users` (`name`) VALUES ('amy')");

    qb.set_raw("visits", "visits + 1").where_("id", 2);
    qb.update(Some("users"), None, None).unwrap();
    assert_eq!(
        script.last_statement().unwrap(),
        "UPDATE `users` SET `visits` = visits + 1 WHERE `id` = 2"
    );
}

#[test]
fn test_replace() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.set("id", 1).set("name", "x");
    qb.replace(Some("users")).unwrap();
    assert_eq!(
        script.last_statement().unwrap(),
        "REPLACE INTO `users` (`id`, `name`) VALUES (1, 'x')"
    );
}

#[test]
fn test_update_with_raw_where_and_limit() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.set("name", "x");
    qb.update(Some("users"), Some("id = 4"), Some(1)).unwrap();
    assert_eq!(
        script.last_statement().unwrap(),
        "UPDATE `users` SET `name` = 'x' WHERE id = 4 LIMIT 1"
    );
}

#[test]
fn test_update_falls_back_to_from_table() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.from("users").set("name", "x").where_("id", 1);
    qb.update(None, None, None).unwrap();
    assert_eq!(
        script.last_statement().unwrap(),
        "UPDATE `users` SET `name` = 'x' WHERE `id` = 1"
    );
}

#[test]
fn test_update_without_table_is_refused() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.set("name", "x");
    let err = qb.update(None, None, None).unwrap_err();
    assert!(err.is_usage());
    assert!(script.statements().is_empty());
}

#[test]
fn test_refused_update_keeps_conditions() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.where_("id", 1);
    assert!(qb.update(Some("users"), None, None).unwrap_err().is_usage());
    assert!(script.statements().is_empty());

    qb.get(Some("users")).unwrap();
    assert_eq!(script.last_statement().unwrap(), "SELECT * FROM `users` WHERE `id` = 1");
}

#[test]
fn test_delete_requires_condition() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    let err = qb.delete(Some("users"), None).unwrap_err();
    assert!(err.is_usage());
    assert!(script.statements().is_empty());
}

#[test]
fn test_delete_with_where() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.delete(Some("users"), Some("id = 3")).unwrap();
    assert_eq!(script.last_statement().unwrap(), "DELETE FROM `users` WHERE id = 3");

    qb.like("name", "tmp", LikeSide::After);
    qb.delete(Some("users"), None).unwrap();
    assert_eq!(script.last_statement().unwrap(), "DELETE FROM `users` WHERE `name` LIKE 'tmp%'");

    assert!(qb.delete(Some("users"), None).unwrap_err().is_usage());
}

#[test]
fn test_delete_tables_shares_conditions() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.where_("user_id", 9);
    qb.delete_tables(&["posts", "comments"], None, None).unwrap();
    assert_eq!(
        script.statements(),
        vec![
            "DELETE FROM `posts` WHERE `user_id` = 9".to_string(),
            "DELETE FROM `comments` WHERE `user_id` = 9".to_string(),
        ]
    );
}

#[test]
fn test_empty_table_and_truncate() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.empty_table(Some("logs")).unwrap();
    qb.truncate(Some("logs")).unwrap();
    assert_eq!(
        script.statements(),
        vec!["DELETE FROM `logs`".to_string(), "TRUNCATE `logs`".to_string()]
    );
}

#[test]
fn test_insert_batch_chunks_by_hundred() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    assert_eq!(qb.insert_batch(Some("t"), Some(&rows(250))).unwrap(), 3);
    assert_eq!(script.statements().len(), 3);

    script.clear_statements();
    assert_eq!(qb.insert_batch(Some("t"), Some(&rows(200))).unwrap(), 2);
    assert_eq!(script.statements().len(), 2);
    assert!(script.statements()[0].starts_with("INSERT INTO `t` (`id`, `name`) VALUES (0, 'row-0'), (1, 'row-1')"));
}

#[test]
fn test_insert_batch_stops_at_failing_chunk() {
    let (mut db, script) = mock_db();
    script.fail_on("'row-150'");
    let mut qb = db.qb().unwrap();
    assert!(qb.insert_batch(Some("t"), Some(&rows(250))).is_err());
    assert_eq!(script.statements().len(), 2);

    assert!(qb.insert_batch(Some("t"), None).unwrap_err().is_usage());
}

#[test]
fn test_insert_batch_rejects_mismatched_rows() {
    let (mut db, _) = mock_db();
    let mut qb = db.qb().unwrap();
    let rows = vec![
        record(&[("a", Value::from(1))]),
        record(&[("b", Value::from(2))]),
    ];
    assert!(qb.insert_batch(Some("t"), Some(&rows)).unwrap_err().is_usage());
}

#[test]
fn test_update_batch() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    let rows = vec![
        record(&[("id", Value::from(1)), ("name", Value::from("a"))]),
        record(&[("id", Value::from(2)), ("name", Value::from("b"))]),
    ];
    assert_eq!(qb.update_batch(Some("users"), Some(&rows), Some("id")).unwrap(), 1);
    assert_eq!(
        script.last_statement().unwrap(),
        "UPDATE `users` SET `name` = CASE WHEN `id` = 1 THEN 'a' WHEN `id` = 2 THEN 'b' \
         ELSE `name` END WHERE `id` IN (1,2)"
    );
}

#[test]
fn test_update_batch_requires_index() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    let rows = vec![record(&[("id", Value::from(1)), ("name", Value::from("a"))])];

    assert!(qb.update_batch(Some("users"), Some(&rows), None).unwrap_err().is_usage());

    let missing = vec![record(&[("name", Value::from("a"))])];
    let err = qb.update_batch(Some("users"), Some(&missing), Some("id")).unwrap_err();
    assert!(err.to_string().contains("missing the specified index"));
    assert!(script.statements().is_empty());
}

#[test]
fn test_update_batch_chunks_by_hundred() {
    let (mut db, script) = mock_db();
    let mut qb = db.qb().unwrap();
    qb.update_batch(Some("t"), Some(&rows(201)), Some("id")).unwrap();
    assert_eq!(script.statements().len(), 3);
}

#[test]
fn test_usage_errors_are_fatal_in_debug_mode() {
    let (mut db, _) = mock_database(ConnectionConfig::new("mock").debug(true));
    let mut qb = db.qb().unwrap();
    assert!(qb.delete(Some("users"), None).unwrap_err().is_fatal());
}
