//! 好友备注解析。
//!
//! 每次解析恰好发起一次批量存储查询，输入集合为空时不查询。

use std::collections::HashMap;
use std::sync::Arc;

use domain::UserId;

use crate::error::ApplicationError;
use crate::repository::AliasRepository;

pub struct AliasResolver {
    aliases: Arc<dyn AliasRepository>,
}

impl AliasResolver {
    pub fn new(aliases: Arc<dyn AliasRepository>) -> Self {
        Self { aliases }
    }

    /// `owner` 视角下的备注：`target -> alias`。未出现的目标使用基础名称。
    pub async fn resolve_aliases(
        &self,
        owner: UserId,
        targets: &[UserId],
    ) -> Result<HashMap<UserId, String>, ApplicationError> {
        let targets = unique(targets);
        if targets.is_empty() {
            return Ok(HashMap::new());
        }
        let records = self.aliases.find_by_owner(owner, &targets).await?;
        Ok(records
            .iter()
            .filter(|record| record.owner_id == owner && targets.contains(&record.target_user_id))
            .filter_map(|record| {
                record
                    .effective_alias()
                    .map(|alias| (record.target_user_id, alias.to_owned()))
            })
            .collect())
    }

    /// 扇出方向：各 `viewer` 给 `target` 起的备注，`viewer -> alias`。
    pub async fn aliases_for_viewers(
        &self,
        target: UserId,
        viewers: &[UserId],
    ) -> Result<HashMap<UserId, String>, ApplicationError> {
        let viewers = unique(viewers);
        if viewers.is_empty() {
            return Ok(HashMap::new());
        }
        let records = self.aliases.find_by_target(target, &viewers).await?;
        Ok(records
            .iter()
            .filter(|record| record.target_user_id == target && viewers.contains(&record.owner_id))
            .filter_map(|record| {
                record
                    .effective_alias()
                    .map(|alias| (record.owner_id, alias.to_owned()))
            })
            .collect())
    }
}

fn unique(ids: &[UserId]) -> Vec<UserId> {
    let mut ids = ids.to_vec();
    ids.sort();
    ids.dedup();
    ids
}
