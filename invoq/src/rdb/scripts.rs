//! Redis Lua 脚本模块
//! Redis Lua script module
//!
//! 保证记录写入的原子性；状态比较在脚本内完成，新记录由调用方序列化
//! Guarantees atomicity of record writes; the status comparison happens inside
//! the script while the new record is serialized by the caller

/// 创建任务记录脚本
/// Create-record script
///
/// `KEYS[1]` -> task:<task_id>
/// `KEYS[2]` -> session:<session_id>:tasks
/// `ARGV[1]` -> record JSON
/// `ARGV[2]` -> task ID
/// `ARGV[3]` -> session index TTL in seconds
///
/// Returns 1 if created, 0 if the task ID already exists
pub const CREATE: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 1 then
        return 0
    end
    redis.call("SET", KEYS[1], ARGV[1])
    redis.call("SADD", KEYS[2], ARGV[2])
    redis.call("EXPIRE", KEYS[2], tonumber(ARGV[3]))
    return 1
"#;

/// 状态比较并交换脚本
/// Status compare-and-swap script
///
/// 调用方已读取记录并在 Rust 侧计算好新 JSON；脚本校验存储中的
/// status 仍等于读取时观察到的值，相符则整体替换
/// The caller has fetched the record and computed the new JSON on the Rust
/// side; the script verifies the stored status still equals the observed one
/// and swaps the whole value if it does
///
/// `KEYS[1]` -> task:<task_id>
/// `ARGV[1]` -> observed status string
/// `ARGV[2]` -> new record JSON
/// `ARGV[3]` -> TTL in seconds, 0 keeps the key non-expiring
///
/// Returns "__ok__" on swap, "__missing__" when the key is gone, otherwise
/// the currently stored status
pub const COMPARE_AND_SWAP: &str = r#"
    local raw = redis.call("GET", KEYS[1])
    if not raw then
        return "__missing__"
    end
    local record = cjson.decode(raw)
    if record.status ~= ARGV[1] then
        return record.status
    end
    if tonumber(ARGV[3]) > 0 then
        redis.call("SET", KEYS[1], ARGV[2], "EX", tonumber(ARGV[3]))
    else
        redis.call("SET", KEYS[1], ARGV[2])
    end
    return "__ok__"
"#;
